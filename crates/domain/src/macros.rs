//! Display/FromStr for string-labelled enums
//!
//! ```rust
//! use perkgate_domain::impl_domain_status_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum Lane {
//!     Fast,
//!     Slow,
//! }
//!
//! impl_domain_status_conversions!(Lane {
//!     Fast => "fast",
//!     Slow => "slow",
//! });
//!
//! assert_eq!(Lane::Fast.as_str(), "fast");
//! assert_eq!("SLOW".parse::<Lane>(), Ok(Lane::Slow));
//! ```

/// Implements `as_str`, `Display` and case-insensitive `FromStr` for an enum
/// whose variants each map to one lowercase label.
#[macro_export]
macro_rules! impl_domain_status_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl $enum_name {
            /// Stable lowercase label
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $str,)+
                }
            }
        }

        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}
