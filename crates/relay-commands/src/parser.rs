use regex::Regex;

/// A parsed `!command arg1 arg2` invocation. Parsing itself never fails —
/// any non-empty, `!`-prefixed text parses into *some* command name, even
/// one the registry doesn't recognise (the dispatcher reacts `unknown`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub name: String,
    pub args: Vec<String>,
}

/// Split `!verb arg1 arg2...` on whitespace. Returns `None` if `text` does
/// not start with `!` or names an empty command.
pub fn parse(text: &str) -> Option<ParsedCommand> {
    let text = text.trim();
    if !text.starts_with('!') {
        return None;
    }
    let mut tokens = text[1..].split_whitespace();
    let name = tokens.next()?.to_lowercase();
    if name.is_empty() {
        return None;
    }
    Some(ParsedCommand {
        name,
        args: tokens.map(str::to_string).collect(),
    })
}

/// Extract the user id from a `<@U1234>`-style mention token. Returns an
/// empty string if `tagged` isn't a mention (callers treat that as an
/// argument-validation failure, per spec.md §4.5).
pub fn mention_id(tagged: &str) -> String {
    thread_local! {
        static RE: Regex = Regex::new("<@(.*?)>").unwrap();
    }
    RE.with(|re| {
        re.captures(tagged)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_name_and_args_case_insensitively() {
        let cmd = parse("!Blacklist rm <@U1>").unwrap();
        assert_eq!(cmd.name, "blacklist");
        assert_eq!(cmd.args, vec!["rm".to_string(), "<@U1>".to_string()]);
    }

    #[test]
    fn non_bang_text_does_not_parse() {
        assert!(parse("hello").is_none());
    }

    #[test]
    fn mention_id_extracts_user_id() {
        assert_eq!(mention_id("<@U123ABC>"), "U123ABC");
        assert_eq!(mention_id("not a mention"), "");
    }
}
