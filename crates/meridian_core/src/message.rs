//! Received RPC messages and call targets.

use crate::codec::Frame;
use crate::error::{CoreError, Result};
use crate::types::PeerId;
use crate::utils::current_timestamp_millis;
use serde::de::DeserializeOwned;
use std::any::type_name;
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// A fully received RPC message.
///
/// Arguments stay as string tokens until a handler asks for them with a
/// concrete type, so a bad argument only fails the handler that reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    service: String,
    method: String,
    sender_id: PeerId,
    sent_at: u64,
    received_at: u64,
    args: Vec<String>,
}

impl Message {
    pub fn new(
        service: impl Into<String>,
        method: impl Into<String>,
        sender_id: PeerId,
        sent_at: u64,
        args: Vec<String>,
    ) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            sender_id,
            sent_at,
            received_at: current_timestamp_millis(),
            args,
        }
    }

    /// Builds a message from a decoded frame received from `sender_id`.
    pub fn from_frame(frame: Frame, sender_id: PeerId, received_at: u64) -> Self {
        Self {
            service: frame.service,
            method: frame.method,
            sender_id,
            sent_at: frame.timestamp,
            received_at,
            args: frame.args,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn sender_id(&self) -> PeerId {
        self.sender_id
    }

    /// Sender's clock when the frame was encoded, in milliseconds.
    pub fn sent_at(&self) -> u64 {
        self.sent_at
    }

    /// Local clock when the frame reached the host, in milliseconds.
    pub fn received_at(&self) -> u64 {
        self.received_at
    }

    pub fn num_args(&self) -> usize {
        self.args.len()
    }

    pub fn raw_args(&self) -> &[String] {
        &self.args
    }

    /// Borrows argument `index` as a string.
    pub fn arg_str(&self, index: usize) -> Result<&str> {
        self.args
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| missing::<str>(index))
    }

    /// Converts argument `index` to `T`.
    ///
    /// # Errors
    ///
    /// [`CoreError::ArgumentConversion`] when the index is out of range or the
    /// token does not parse as `T`.
    pub fn arg<T: FromStr>(&self, index: usize) -> Result<T> {
        let token = self.args.get(index).ok_or_else(|| missing::<T>(index))?;
        token.parse::<T>().map_err(|_| CoreError::ArgumentConversion {
            index,
            expected: type_name::<T>(),
            token: token.clone(),
        })
    }

    /// Decodes argument `index` as JSON.
    pub fn arg_json<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        let token = self.args.get(index).ok_or_else(|| missing::<T>(index))?;
        serde_json::from_str(token).map_err(|_| CoreError::ArgumentConversion {
            index,
            expected: type_name::<T>(),
            token: token.clone(),
        })
    }
}

fn missing<T: ?Sized>(index: usize) -> CoreError {
    CoreError::ArgumentConversion {
        index,
        expected: type_name::<T>(),
        token: "<missing>".to_string(),
    }
}

/// A resolved `(service, method)` pair.
///
/// Targets are cheap to build once, typically as constants next to the
/// service that handles them, and reused for every call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RpcTarget {
    service: Cow<'static, str>,
    method: Cow<'static, str>,
}

impl RpcTarget {
    pub const fn new(service: &'static str, method: &'static str) -> Self {
        Self {
            service: Cow::Borrowed(service),
            method: Cow::Borrowed(method),
        }
    }

    /// Builds a target from runtime strings.
    pub fn owned(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: Cow::Owned(service.into()),
            method: Cow::Owned(method.into()),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

impl fmt::Display for RpcTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.service, self.method)
    }
}

/// Builds an RPC argument list from any values implementing `Display`.
///
/// ```rust
/// use meridian_core::args;
/// let args = args![42, "player", true];
/// assert_eq!(args, vec!["42", "player", "true"]);
/// ```
#[macro_export]
macro_rules! args {
    () => {
        ::std::vec::Vec::<::std::string::String>::new()
    };
    ($($arg:expr),+ $(,)?) => {
        ::std::vec![$(::std::string::ToString::to_string(&$arg)),+]
    };
}
