//! Field descriptors and the per-session field registry.
//!
//! A DND server describes every field it knows with a name and two access
//! classes, one for reading and one for writing. The classes form a total
//! order of increasing restriction:
//!
//! - `A` [`Permission::Any`]: anybody, validated or not.
//! - `U` [`Permission::User`]: the validated owner of the record.
//! - `T` [`Permission::Trusted`]: trusted (administrative) users.
//! - `N` [`Permission::Nobody`]: nobody through the protocol.
//!
//! A field is readable by a visibility `v` when its read class is at or
//! below `v`. The registry is fetched once per session with the `FIELDS`
//! command and answers every query locally afterwards.
use std::{collections::BTreeMap, fmt, str::FromStr};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("unknown permission class '{0}'")]
    UnknownPermission(String),

    #[error("malformed field descriptor '{0}'")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Permission {
    Any,
    User,
    Trusted,
    Nobody,
}

impl Permission {
    /// Decodes the single-letter wire form.
    pub fn from_code(code: &str) -> Result<Self, FieldError> {
        match code {
            "A" | "a" => Ok(Permission::Any),
            "U" | "u" => Ok(Permission::User),
            "T" | "t" => Ok(Permission::Trusted),
            "N" | "n" => Ok(Permission::Nobody),
            other => Err(FieldError::UnknownPermission(other.to_string())),
        }
    }

    pub fn code(&self) -> char {
        match self {
            Permission::Any => 'A',
            Permission::User => 'U',
            Permission::Trusted => 'T',
            Permission::Nobody => 'N',
        }
    }

    pub fn grants(&self, class: Permission) -> bool {
        class <= *self
    }
}

impl FromStr for Permission {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "any" => Ok(Permission::Any),
            "user" => Ok(Permission::User),
            "trusted" => Ok(Permission::Trusted),
            "nobody" => Ok(Permission::Nobody),
            other => Permission::from_code(other),
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Permission::Any => "any",
            Permission::User => "user",
            Permission::Trusted => "trusted",
            Permission::Nobody => "nobody",
        };
        f.write_str(name)
    }
}

/// One field as advertised by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub read: Permission,
    pub write: Permission,
}

impl Field {
    pub fn new(name: impl Into<String>, read: Permission, write: Permission) -> Self {
        Self {
            name: name.into(),
            read,
            write,
        }
    }

    /// Parses the `<name> <write> <read>` text of a `120` line.
    pub fn parse(line: &str) -> Result<Self, FieldError> {
        let parts = line.split_whitespace().collect::<Vec<&str>>();
        if parts.len() != 3 {
            return Err(FieldError::Malformed(line.to_string()));
        }

        let write = Permission::from_code(parts[1])?;
        let read = Permission::from_code(parts[2])?;
        Ok(Self::new(parts[0], read, write))
    }

    /// Renders the `<name> <write> <read>` text of a `120` line.
    pub fn to_line(&self) -> String {
        format!("{} {} {}", self.name, self.write.code(), self.read.code())
    }

    pub fn is_readable_by(&self, visibility: Permission) -> bool {
        visibility.grants(self.read)
    }

    pub fn is_writable_by(&self, visibility: Permission) -> bool {
        visibility.grants(self.write)
    }
}

/// Fields known to a server, keyed case-insensitively by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldRegistry {
    fields: BTreeMap<String, Field>,
}

impl FieldRegistry {
    pub fn new(fields: impl IntoIterator<Item = Field>) -> Self {
        let fields = fields
            .into_iter()
            .map(|f| (f.name.to_lowercase(), f))
            .collect();
        Self { fields }
    }

    pub fn field_named(&self, name: &str) -> Option<&Field> {
        self.fields.get(&name.to_lowercase())
    }

    pub fn readable_by(&self, visibility: Permission) -> Vec<&Field> {
        self.fields
            .values()
            .filter(|f| f.is_readable_by(visibility))
            .collect()
    }

    pub fn writable_by(&self, visibility: Permission) -> Vec<&Field> {
        self.fields
            .values()
            .filter(|f| f.is_writable_by(visibility))
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.fields.values().map(|f| f.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sixteen fields covering every (read, write) pair.
    fn every_pair() -> FieldRegistry {
        let classes = [
            Permission::Any,
            Permission::User,
            Permission::Nobody,
            Permission::Trusted,
        ];
        let mut fields = Vec::new();
        for write in classes {
            for read in classes {
                fields.push(Field::new(format!("field{}", fields.len() + 1), read, write));
            }
        }
        FieldRegistry::new(fields)
    }

    #[test]
    fn permission_order() {
        assert!(Permission::Any < Permission::User);
        assert!(Permission::User < Permission::Trusted);
        assert!(Permission::Trusted < Permission::Nobody);
        assert!(Permission::User.grants(Permission::Any));
        assert!(!Permission::Any.grants(Permission::User));
    }

    #[test]
    fn permission_from_names_and_codes() {
        assert_eq!("ANY".parse::<Permission>().unwrap(), Permission::Any);
        assert_eq!("user".parse::<Permission>().unwrap(), Permission::User);
        assert_eq!("t".parse::<Permission>().unwrap(), Permission::Trusted);
        assert_eq!(
            "admin".parse::<Permission>(),
            Err(FieldError::UnknownPermission("admin".to_string()))
        );
    }

    #[test]
    fn parse_field_line() {
        let field = Field::parse("nickname U A").unwrap();

        assert_eq!(field, Field::new("nickname", Permission::Any, Permission::User));
        assert_eq!(field.to_line(), "nickname U A");
    }

    #[test]
    #[should_panic(expected = "Malformed")]
    fn parse_field_line_missing_class() {
        Field::parse("nickname U").unwrap();
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = every_pair();

        assert_eq!(registry.len(), 16);
        assert!(registry.field_named("FIELD7").is_some());
        assert!(registry.field_named("Field16").is_some());
        assert!(registry.field_named("field17").is_none());
    }

    #[test]
    fn permission_filters() {
        let registry = every_pair();

        assert_eq!(registry.readable_by(Permission::Any).len(), 4);
        assert_eq!(registry.writable_by(Permission::Any).len(), 4);
        assert_eq!(registry.readable_by(Permission::User).len(), 8);
        assert_eq!(registry.readable_by(Permission::Nobody).len(), 16);
    }

    #[test]
    fn names_keep_server_case() {
        let registry = FieldRegistry::new([Field::new(
            "NickName",
            Permission::Any,
            Permission::User,
        )]);

        assert_eq!(registry.names(), vec!["NickName"]);
    }
}
