//! Opaque string identifiers for the data model (spec §3).

use std::fmt;

pub trait IsEmpty {
    fn is_empty(&self) -> bool;
}

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl IsEmpty for $name {
            fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_type!(NotifierId);
id_type!(TaskId);
id_type!(TaskCommandId);
id_type!(TaskInstanceId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ids_are_detected() {
        assert!(TaskId::new("").is_empty());
        assert!(!TaskId::new("price_watch").is_empty());
    }

    #[test]
    fn display_matches_inner_string() {
        assert_eq!(TaskInstanceId::new("abc123").to_string(), "abc123");
    }
}
