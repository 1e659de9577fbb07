//! Wire names for commands and server events.
//!
//! Each enum maps to its `SCREAMING_SNAKE_CASE` wire string through one
//! static table. Both directions read the same table, so a variant can never
//! have two spellings; the tests check that the table covers every variant
//! exactly once.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Declares a fieldless enum together with its wire-name table.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $wire:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )+
        }

        impl $name {
            /// Every variant paired with its wire string.
            pub const TABLE: &'static [($name, &'static str)] = &[
                $( ($name::$variant, $wire), )+
            ];

            /// The string sent on the wire for this variant.
            pub fn as_wire(self) -> &'static str {
                Self::TABLE
                    .iter()
                    .find(|(v, _)| *v == self)
                    .map(|(_, w)| *w)
                    .unwrap_or_default()
            }

            /// Looks a wire string up in the table.
            pub fn from_wire(s: &str) -> Option<Self> {
                Self::TABLE.iter().find(|(_, w)| *w == s).map(|(v, _)| *v)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_wire())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_wire())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_wire(&s).ok_or_else(|| {
                    serde::de::Error::custom(format!(
                        concat!("unknown ", stringify!($name), " `{}`"),
                        s
                    ))
                })
            }
        }
    };
}

wire_enum! {
    /// Commands the client sends in the `cmd` field.
    pub enum Command {
        /// Server-originated event delivery; also the outbound close request.
        Dispatch => "DISPATCH",
        /// Sets or clears the rich presence.
        SetActivity => "SET_ACTIVITY",
        /// Starts delivery of one server event.
        Subscribe => "SUBSCRIBE",
        /// Stops delivery of one server event.
        Unsubscribe => "UNSUBSCRIBE",
        /// Accepts a join request.
        SendActivityJoinInvite => "SEND_ACTIVITY_JOIN_INVITE",
        /// Rejects a join request.
        CloseActivityRequest => "CLOSE_ACTIVITY_REQUEST",
    }
}

wire_enum! {
    /// Events the peer reports in the `evt` field.
    pub enum ServerEvent {
        /// Handshake acknowledged.
        Ready => "READY",
        /// A command or the connection failed.
        Error => "ERROR",
        /// Another user joined through this application's invite.
        ActivityJoin => "ACTIVITY_JOIN",
        /// Another user started spectating.
        ActivitySpectate => "ACTIVITY_SPECTATE",
        /// Another user asked to join.
        ActivityJoinRequest => "ACTIVITY_JOIN_REQUEST",
    }
}

impl Command {
    /// Whether the peer answers this command with a nonce-correlated reply.
    ///
    /// `Dispatch` is only ever sent fire-and-forget (the close request).
    pub fn expects_reply(self) -> bool {
        !matches!(self, Command::Dispatch)
    }
}

/// A wire-name field that may carry a value this client does not know.
///
/// Inbound payloads are parsed with this wrapper so that a new command or
/// event name from a newer peer is kept as text instead of failing the
/// whole payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wire<T> {
    /// A name found in the table.
    Known(T),
    /// Any other string.
    Unknown(String),
}

impl<T: Copy> Wire<T> {
    /// The known value, if any.
    pub fn known(&self) -> Option<T> {
        match self {
            Wire::Known(v) => Some(*v),
            Wire::Unknown(_) => None,
        }
    }
}

impl<T: fmt::Display> fmt::Display for Wire<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Wire::Known(v) => v.fmt(f),
            Wire::Unknown(s) => f.write_str(s),
        }
    }
}

impl<'de, T> Deserialize<'de> for Wire<T>
where
    T: for<'a> TryFrom<&'a str>,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let parsed = T::try_from(s.as_str()).ok();
        Ok(match parsed {
            Some(v) => Wire::Known(v),
            None => Wire::Unknown(s),
        })
    }
}

impl TryFrom<&str> for Command {
    type Error = ();

    fn try_from(s: &str) -> Result<Self, ()> {
        Command::from_wire(s).ok_or(())
    }
}

impl TryFrom<&str> for ServerEvent {
    type Error = ();

    fn try_from(s: &str) -> Result<Self, ()> {
        ServerEvent::from_wire(s).ok_or(())
    }
}
