use std::fmt;

/// Commands a DND client may send, one per line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `FIELDS`: list field descriptors.
    Fields,
    /// `LOOKUP subject[,field field ...]`
    Lookup { subject: String, fields: Vec<String> },
    /// `VALIDATE subject[,field field ...]`: request a challenge.
    Validate { subject: String, fields: Vec<String> },
    /// `PASS password`: answer a challenge in the clear.
    Password(String),
    /// `PASE token`: answer a challenge with the encrypted challenge.
    EncryptedPassword(String),
    /// `UNPRIV`: drop privileges gained by validation.
    Unprivilege,
    /// `NOOP`
    Noop,
    /// `QUIT`
    Quit,
    /// Any verb the protocol does not know, kept for the `500` path.
    Unknown { verb: String, argument: String },
}

impl Request {
    pub fn verb(&self) -> &str {
        match self {
            Request::Fields => "FIELDS",
            Request::Lookup { .. } => "LOOKUP",
            Request::Validate { .. } => "VALIDATE",
            Request::Password(_) => "PASS",
            Request::EncryptedPassword(_) => "PASE",
            Request::Unprivilege => "UNPRIV",
            Request::Noop => "NOOP",
            Request::Quit => "QUIT",
            Request::Unknown { verb, .. } => verb,
        }
    }

    pub fn argument(&self) -> String {
        match self {
            Request::Lookup { subject, fields } | Request::Validate { subject, fields } => {
                if fields.is_empty() {
                    subject.clone()
                } else {
                    format!("{subject},{}", fields.join(" "))
                }
            }
            Request::Password(s) | Request::EncryptedPassword(s) => s.clone(),
            Request::Unknown { argument, .. } => argument.clone(),
            Request::Fields | Request::Unprivilege | Request::Noop | Request::Quit => {
                String::new()
            }
        }
    }

    /// Parses a received command line. Verbs are case-insensitive.
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end();
        let (verb, argument) = line.split_once(' ').unwrap_or((line, ""));

        match verb.to_uppercase().as_str() {
            "FIELDS" => Request::Fields,
            "LOOKUP" => {
                let (subject, fields) = split_subject(argument);
                Request::Lookup { subject, fields }
            }
            "VALIDATE" => {
                let (subject, fields) = split_subject(argument);
                Request::Validate { subject, fields }
            }
            "PASS" => Request::Password(argument.to_string()),
            "PASE" => Request::EncryptedPassword(argument.to_string()),
            "UNPRIV" => Request::Unprivilege,
            "NOOP" => Request::Noop,
            "QUIT" => Request::Quit,
            _ => Request::Unknown {
                verb: verb.to_string(),
                argument: argument.to_string(),
            },
        }
    }
}

/// Splits `subject[,field field ...]` into its parts.
fn split_subject(argument: &str) -> (String, Vec<String>) {
    match argument.split_once(',') {
        Some((subject, fields)) => (
            subject.to_string(),
            fields.split(' ').map(str::to_string).collect(),
        ),
        None => (argument.to_string(), Vec::new()),
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let argument = self.argument();
        if argument.is_empty() {
            write!(f, "{}", self.verb())
        } else {
            write!(f, "{} {}", self.verb(), argument)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_line_joins_fields() {
        let command = Request::Lookup {
            subject: "unique".to_string(),
            fields: vec!["field1".to_string(), "field9".to_string()],
        };

        assert_eq!(command.to_string(), "LOOKUP unique,field1 field9");
    }

    #[test]
    fn lookup_line_without_fields() {
        let command = Request::Lookup {
            subject: "John Smith".to_string(),
            fields: vec![],
        };

        assert_eq!(command.to_string(), "LOOKUP John Smith");
    }

    #[test]
    fn bare_verbs() {
        assert_eq!(Request::Noop.to_string(), "NOOP");
        assert_eq!(Request::Fields.to_string(), "FIELDS");
        assert_eq!(Request::Quit.to_string(), "QUIT");
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(Request::parse("noop"), Request::Noop);
        assert_eq!(Request::parse("Unpriv\r\n"), Request::Unprivilege);
    }

    #[test]
    fn parse_validate_with_fields() {
        assert_eq!(
            Request::parse("VALIDATE unique,field1 field2"),
            Request::Validate {
                subject: "unique".to_string(),
                fields: vec!["field1".to_string(), "field2".to_string()],
            }
        );
    }

    #[test]
    fn parse_password_keeps_inner_spaces() {
        assert_eq!(
            Request::parse("PASS irrelevant password"),
            Request::Password("irrelevant password".to_string())
        );
    }

    #[test]
    fn parse_unknown_verb() {
        assert_eq!(
            Request::parse("CHANGE name x"),
            Request::Unknown {
                verb: "CHANGE".to_string(),
                argument: "name x".to_string(),
            }
        );
    }
}
