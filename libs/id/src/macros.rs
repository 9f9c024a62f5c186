//! Macros for defining typed ID types.

/// Macro to define a typed, string-backed ID.
///
/// This generates a newtype wrapper around `Arc<str>` with:
/// - A `KIND` constant used in error messages
/// - `parse()` with trimming and validation
/// - `as_str()` for borrowing the raw value
/// - `Display`, `FromStr`, `From<u64>` implementations
/// - `Serialize` (as string) and `Deserialize` (string or integer)
/// - `Ord`, `Hash`, and other standard traits
///
/// # Example
///
/// ```ignore
/// define_id!(VehicleId, "vehicle id");
///
/// let id: VehicleId = "18234771".parse()?;
/// let same = VehicleId::from(18234771u64);
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident, $kind:literal) => {
        /// A typed ID for this resource type.
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(std::sync::Arc<str>);

        impl $name {
            /// Human readable name of this ID type.
            pub const KIND: &'static str = $kind;

            /// Parses an ID from a string.
            ///
            /// Leading and trailing whitespace is ignored.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err($crate::IdError::Empty { kind: Self::KIND });
                }

                if trimmed.chars().any(char::is_whitespace) {
                    return Err($crate::IdError::EmbeddedWhitespace {
                        kind: Self::KIND,
                        actual: trimmed.to_string(),
                    });
                }

                Ok(Self(std::sync::Arc::from(trimmed)))
            }

            /// Returns the raw identifier.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(std::sync::Arc::from(value.to_string()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                struct IdVisitor;

                impl<'de> serde::de::Visitor<'de> for IdVisitor {
                    type Value = $name;

                    fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                        write!(f, "a {} as string or integer", $name::KIND)
                    }

                    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
                    where
                        E: serde::de::Error,
                    {
                        $name::parse(v).map_err(E::custom)
                    }

                    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
                    where
                        E: serde::de::Error,
                    {
                        Ok($name::from(v))
                    }

                    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
                    where
                        E: serde::de::Error,
                    {
                        u64::try_from(v)
                            .map($name::from)
                            .map_err(|_| E::custom(format!("negative {}: {}", $name::KIND, v)))
                    }
                }

                deserializer.deserialize_any(IdVisitor)
            }
        }
    };
}
