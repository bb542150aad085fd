use crate::error::ParseError;
use crate::types::*;

/// Upper bound on the number of tokens in one command line.
pub const MAX_ARGS: usize = 100;

type ParseResult<T> = Result<T, ParseError>;

fn is_whitespace(c: char) -> bool {
	matches!(c, ' ' | '\t' | '\n')
}

fn redirect_type(token: &str) -> Option<RedirectType> {
	match token {
		"<" => Some(RedirectType::Input),
		">" => Some(RedirectType::Output),
		_ => None,
	}
}

fn is_operator(token: &str) -> bool {
	matches!(token, "<" | ">" | "|" | "&")
}

/// Splits a raw line into whitespace-delimited tokens.
pub fn tokenize(line: &str) -> ParseResult<Vec<&str>> {
	let tokens: Vec<&str> = line.split(is_whitespace).filter(|t| !t.is_empty()).collect();
	if tokens.len() > MAX_ARGS {
		return Err(ParseError::TooManyArguments { limit: MAX_ARGS });
	}
	Ok(tokens)
}

struct Parser<'a> {
	tokens: &'a [&'a str],
	i: usize,
	input: Option<String>,
	output: Option<(usize, String)>,
}

impl<'a> Parser<'a> {
	fn new(tokens: &'a [&'a str]) -> Parser<'a> {
		Parser { tokens, i: 0, input: None, output: None }
	}

	fn peek(&self) -> Option<&'a str> {
		self.tokens.get(self.i).cloned()
	}

	fn parse_redirect(&mut self, typ: RedirectType, stage_idx: usize, stage_is_empty: bool) -> ParseResult<()> {
		self.i += 1;
		let target = match self.peek() {
			Some(t) if !is_operator(t) => t,
			_ => { return Err(ParseError::DanglingRedirection(typ)); },
		};
		self.i += 1;

		let taken = match typ {
			RedirectType::Input => self.input.is_some(),
			RedirectType::Output => self.output.is_some(),
		};
		if taken {
			return Err(ParseError::DuplicateRedirection(typ));
		}
		if stage_is_empty {
			return Err(ParseError::MisplacedRedirection(typ));
		}

		match typ {
			RedirectType::Input => {
				if stage_idx != 0 {
					return Err(ParseError::MisplacedRedirection(typ));
				}
				self.input = Some(target.to_string());
			},
			RedirectType::Output => {
				self.output = Some((stage_idx, target.to_string()));
			},
		}
		Ok(())
	}

	fn parse_stage(&mut self, stage_idx: usize) -> ParseResult<Stage> {
		let mut argv: Vec<String> = vec![];
		while let Some(token) = self.peek() {
			if token == "|" {
				break;
			}
			if token == "&" {
				return Err(ParseError::MisplacedBackgroundMarker);
			}
			match redirect_type(token) {
				Some(typ) => self.parse_redirect(typ, stage_idx, argv.is_empty())?,
				None => {
					argv.push(token.to_string());
					self.i += 1;
				},
			}
		}
		if argv.is_empty() {
			return Err(ParseError::EmptyPipeline);
		}
		Ok(Stage { argv })
	}

	fn parse_stages(&mut self) -> ParseResult<Vec<Stage>> {
		let mut stages: Vec<Stage> = vec![];
		loop {
			let stage = self.parse_stage(stages.len())?;
			stages.push(stage);
			match self.peek() {
				Some("|") => { self.i += 1; },
				_ => { break; },
			}
		}
		if let Some((idx, _)) = self.output {
			if idx != stages.len() - 1 {
				return Err(ParseError::MisplacedRedirection(RedirectType::Output));
			}
		}
		Ok(stages)
	}
}

/// Builds a pipeline from a raw line.
///
/// A blank line yields `Ok(None)`: there is nothing to run.
pub fn parse(line: &str) -> ParseResult<Option<Pipeline>> {
	let mut tokens = tokenize(line)?;
	if tokens.is_empty() {
		return Ok(None);
	}

	let is_background = tokens.last() == Some(&"&");
	if is_background {
		tokens.pop();
	}
	if tokens.is_empty() {
		return Err(ParseError::EmptyPipeline);
	}

	let mut parser = Parser::new(&tokens);
	let stages = parser.parse_stages()?;
	Ok(Some(Pipeline {
		stages,
		input: parser.input,
		output: parser.output.map(|(_, path)| path),
		is_background,
		text: line.trim().to_string(),
	}))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn argvs(p: &Pipeline) -> Vec<Vec<&str>> {
		p.stages.iter().map(|s| s.argv.iter().map(|a| a.as_str()).collect()).collect()
	}

	#[test]
	fn blank_lines_are_noops() {
		assert_eq!(parse(""), Ok(None));
		assert_eq!(parse("   "), Ok(None));
		assert_eq!(parse("\t \n"), Ok(None));
	}

	#[test]
	fn tokenize_splits_on_spaces_tabs_and_newlines() {
		assert_eq!(tokenize("ls\t-l  /tmp\n").unwrap(), vec!["ls", "-l", "/tmp"]);
	}

	#[test]
	fn too_many_tokens_is_an_error() {
		let line = vec!["x"; MAX_ARGS + 1].join(" ");
		assert_eq!(tokenize(&line), Err(ParseError::TooManyArguments { limit: MAX_ARGS }));
		let line = vec!["x"; MAX_ARGS].join(" ");
		assert_eq!(tokenize(&line).unwrap().len(), MAX_ARGS);
	}

	#[test]
	fn splits_stages_at_pipes() {
		let p = parse("cat /etc/passwd | grep root | wc -l").unwrap().unwrap();
		assert_eq!(argvs(&p), vec![vec!["cat", "/etc/passwd"], vec!["grep", "root"], vec!["wc", "-l"]]);
		assert!(!p.is_background);
		assert_eq!(p.input, None);
		assert_eq!(p.output, None);
	}

	#[test]
	fn redirections_attach_to_the_ends() {
		let p = parse("sort < in.txt | uniq -c > out.txt").unwrap().unwrap();
		assert_eq!(argvs(&p), vec![vec!["sort"], vec!["uniq", "-c"]]);
		assert_eq!(p.input.as_ref().map(|s| s.as_str()), Some("in.txt"));
		assert_eq!(p.output.as_ref().map(|s| s.as_str()), Some("out.txt"));
	}

	#[test]
	fn arguments_may_follow_a_redirection() {
		let p = parse("grep < in.txt -n foo").unwrap().unwrap();
		assert_eq!(argvs(&p), vec![vec!["grep", "-n", "foo"]]);
	}

	#[test]
	fn trailing_ampersand_sets_background() {
		let p = parse("sleep 5 &").unwrap().unwrap();
		assert!(p.is_background);
		assert_eq!(argvs(&p), vec![vec!["sleep", "5"]]);
		assert_eq!(p.text, "sleep 5 &");
	}

	#[test]
	fn ampersand_elsewhere_is_rejected() {
		assert_eq!(parse("& sleep 5"), Err(ParseError::MisplacedBackgroundMarker));
		assert_eq!(parse("sleep 5 & | cat"), Err(ParseError::MisplacedBackgroundMarker));
		assert_eq!(parse("&"), Err(ParseError::EmptyPipeline));
	}

	#[test]
	fn dangling_redirection() {
		assert_eq!(parse("cmd >"), Err(ParseError::DanglingRedirection(RedirectType::Output)));
		assert_eq!(parse("cmd < | cat"), Err(ParseError::DanglingRedirection(RedirectType::Input)));
		assert_eq!(parse("cmd > &"), Err(ParseError::DanglingRedirection(RedirectType::Output)));
	}

	#[test]
	fn duplicate_redirection() {
		assert_eq!(parse("cat < a < b"), Err(ParseError::DuplicateRedirection(RedirectType::Input)));
		assert_eq!(parse("cat > a > b"), Err(ParseError::DuplicateRedirection(RedirectType::Output)));
	}

	#[test]
	fn misplaced_redirection() {
		assert_eq!(parse("cat | sort < in"), Err(ParseError::MisplacedRedirection(RedirectType::Input)));
		assert_eq!(parse("cat > out | sort"), Err(ParseError::MisplacedRedirection(RedirectType::Output)));
		assert_eq!(parse("> out echo hi"), Err(ParseError::MisplacedRedirection(RedirectType::Output)));
	}

	#[test]
	fn empty_stages() {
		assert_eq!(parse("|"), Err(ParseError::EmptyPipeline));
		assert_eq!(parse("ls |"), Err(ParseError::EmptyPipeline));
		assert_eq!(parse("| ls"), Err(ParseError::EmptyPipeline));
		assert_eq!(parse("ls | | wc"), Err(ParseError::EmptyPipeline));
	}
}
