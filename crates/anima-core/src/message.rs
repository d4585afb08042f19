//! Message templates carried through processors
//!
//! Request and reply objects are opaque to the runtime: a runner clones the
//! processor's templates, decodes the wire payload into the request, and
//! encodes the reply back out. Application wire formats are not the
//! runtime's business, so the default codec is JSON on both the HTTP and
//! the binary path; applications that need a different binary encoding
//! implement [`Message`] by hand.

use crate::error::Result;
use std::any::Any;
use std::fmt;

/// A clonable, codable message template.
///
/// Implemented automatically for every `serde` value type, which covers the
/// usual case of plain request/reply structs.
pub trait Message: Send + Sync + fmt::Debug {
    /// Encode the message for the wire.
    fn encode(&self) -> Result<Vec<u8>>;

    /// Decode a wire payload into this message in place.
    fn decode(&mut self, buf: &[u8]) -> Result<()>;

    /// Clone into a fresh boxed template.
    fn clone_box(&self) -> Box<dyn Message>;

    /// Downcast support for handlers.
    fn as_any(&self) -> &dyn Any;

    /// Mutable downcast support for handlers.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T> Message for T
where
    T: serde::Serialize
        + serde::de::DeserializeOwned
        + Clone
        + fmt::Debug
        + Send
        + Sync
        + 'static,
{
    fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn decode(&mut self, buf: &[u8]) -> Result<()> {
        *self = serde_json::from_slice(buf)?;
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn Message> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Clone for Box<dyn Message> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Echo {
        text: String,
    }

    #[test]
    fn test_roundtrip() {
        let msg = Echo {
            text: "hello".to_string(),
        };
        let bytes = msg.encode().unwrap();

        let mut decoded = Echo::default();
        decoded.decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_clone_box_is_independent() {
        let template: Box<dyn Message> = Box::new(Echo {
            text: "template".to_string(),
        });

        let mut clone = template.clone();
        clone
            .as_any_mut()
            .downcast_mut::<Echo>()
            .unwrap()
            .text = "mutated".to_string();

        let original = template.as_any().downcast_ref::<Echo>().unwrap();
        assert_eq!(original.text, "template");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let mut msg = Echo::default();
        assert!(msg.decode(b"not json").is_err());
    }
}
