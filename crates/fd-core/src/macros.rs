/// Declares a fieldless enum that is stored as a lowercase string.
///
/// Generates `as_db_str`, `from_db_str`, `ALL`, `Display` and `FromStr`, and
/// keeps the serde representation identical to the database one.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident => $db:literal
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $db)]
                $variant,
            )+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Returns the database representation.
            pub fn as_db_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $db,)+
                }
            }

            /// Parses the database representation.
            pub fn from_db_str(s: &str) -> Option<Self> {
                match s {
                    $($db => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_db_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_db_str(&s.trim().to_lowercase())
                    .ok_or_else(|| format!("invalid {}: {}", stringify!($name), s))
            }
        }
    };
}
