use std::collections::HashMap;

/// Template table for user-visible strings (C8).
///
/// Templates use named placeholders written `{{name}}`. Missing keys
/// resolve to the empty string rather than erroring — per spec.md §4.8,
/// a localisation gap should degrade gracefully, not crash the mirror path.
#[derive(Debug, Clone, Default)]
pub struct LangTable(HashMap<String, String>);

impl LangTable {
    pub fn new(templates: HashMap<String, String>) -> Self {
        Self(templates)
    }

    /// Render `key`'s template, substituting `{{var}}` placeholders from `vars`.
    /// Returns an empty string if `key` is not present in the table.
    pub fn render(&self, key: &str, vars: &[(&str, &str)]) -> String {
        let Some(template) = self.0.get(key) else {
            return String::new();
        };
        let mut out = template.clone();
        for (name, value) in vars {
            out = out.replace(&format!("{{{{{name}}}}}"), value);
        }
        out
    }

    /// Derive the help-topic key for a command name: `help` -> `cmdHelpHelp`.
    pub fn help_key_for(command: &str) -> String {
        let mut chars = command.chars();
        let capitalised = match chars.next() {
            Some(c) => c.to_ascii_uppercase().to_string() + chars.as_str(),
            None => String::new(),
        };
        format!("cmdHelp{capitalised}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> LangTable {
        let mut m = HashMap::new();
        m.insert("msgCopyFmt".to_string(), "*<@{{author}}>:* {{text}}".to_string());
        m.insert("reactSuccess".to_string(), "white_check_mark".to_string());
        LangTable::new(m)
    }

    #[test]
    fn renders_named_placeholders() {
        let t = table();
        let out = t.render("msgCopyFmt", &[("author", "U1"), ("text", "hi")]);
        assert_eq!(out, "*<@U1>:* hi");
    }

    #[test]
    fn missing_key_renders_empty() {
        let t = table();
        assert_eq!(t.render("doesNotExist", &[]), "");
    }

    #[test]
    fn help_key_capitalises_command() {
        assert_eq!(LangTable::help_key_for("help"), "cmdHelpHelp");
        assert_eq!(LangTable::help_key_for("blacklist"), "cmdHelpBlacklist");
    }
}
