//! Validated identifiers.
//!
//! Every identifier category is its own newtype. Validation happens exactly
//! once, at construction or deserialization; after that the type is the
//! proof. Identifiers are restricted to `[A-Za-z0-9._:/@*-]`, 1 to 128 bytes.
//!
//! Node, edge and contact ids are derived from the ids above. Components
//! are escaped (`*` as `**`, `/` as `*s`, `.` as `*d`) so that separators
//! never appear inside a component and distinct inputs never share an id.
//! Derived ids may run to [`MAX_DERIVED_ID_LEN`] bytes.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAX_ID_LEN: usize = 128;

/// Upper bound for node, edge and contact ids: two fully escaped
/// components plus a pin and separators.
pub const MAX_DERIVED_ID_LEN: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} id {id:?}: {reason}")]
pub struct IdError {
    pub kind: &'static str,
    pub id: String,
    pub reason: String,
}

fn validate(kind: &'static str, id: &str, max_len: usize) -> Result<(), IdError> {
    let fail = |reason: &str| IdError {
        kind,
        id: id.to_string(),
        reason: reason.to_string(),
    };
    if id.is_empty() {
        return Err(fail("must not be empty"));
    }
    if id.len() > max_len {
        return Err(fail(&format!("longer than {max_len} bytes")));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '/' | '@' | '*' | '-'))
    {
        return Err(fail("must contain only [A-Za-z0-9._:/@*-]"));
    }
    Ok(())
}

/// Escape one component of a derived id.
fn escape_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '*' => out.push_str("**"),
            '/' => out.push_str("*s"),
            '.' => out.push_str("*d"),
            c => out.push(c),
        }
    }
    out
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        define_id!($(#[$meta])* $name, $kind, MAX_ID_LEN);
    };
    ($(#[$meta:meta])* $name:ident, $kind:literal, $max_len:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
                let id = id.into();
                validate($kind, &id, $max_len)?;
                Ok(Self(id))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = IdError;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id!(
    /// A board: one IR, one binder, one realized graph.
    BoardId,
    "board"
);
define_id!(SlotId, "slot");
define_id!(WireId, "wire");
define_id!(GadgetId, "gadget");
define_id!(PinId, "pin");
define_id!(
    /// Named interface a slot requires and a gadget implements.
    PinoutId,
    "pinout"
);
define_id!(PrincipalId, "principal");
define_id!(NodeId, "node", MAX_DERIVED_ID_LEN);
define_id!(EdgeId, "edge", MAX_DERIVED_ID_LEN);
define_id!(
    /// A realized value cell: `<node>.<pin>`.
    ContactId,
    "contact",
    MAX_DERIVED_ID_LEN
);
define_id!(ReceiptId, "receipt");

impl NodeId {
    /// Deterministic node identity for one occupant of one slot.
    pub fn for_occupant(slot: &SlotId, gadget: &GadgetId) -> Self {
        Self(format!(
            "n:{}/{}",
            escape_component(slot.as_str()),
            escape_component(gadget.as_str())
        ))
    }

    /// Deterministic node identity for the `index`-th shim on a wire.
    pub fn for_shim(wire: &WireId, index: usize, aspect: &AspectId) -> Self {
        Self(format!(
            "s:{}/{index}:{}",
            escape_component(wire.as_str()),
            escape_component(aspect.name())
        ))
    }
}

impl PinId {
    /// Pin names fixed by this crate (shim `in`/`out`).
    pub(crate) fn from_static(raw: &'static str) -> Self {
        Self(raw.to_string())
    }
}

impl PrincipalId {
    pub(crate) fn from_static(raw: &'static str) -> Self {
        Self(raw.to_string())
    }
}

impl ReceiptId {
    pub fn from_uuid(id: uuid::Uuid) -> Self {
        Self(id.to_string())
    }
}

impl EdgeId {
    pub fn for_wire(wire: &WireId, index: usize) -> Self {
        Self(format!("e:{}/{index}", escape_component(wire.as_str())))
    }
}

impl ContactId {
    pub fn for_pin(node: &NodeId, pin: &PinId) -> Self {
        Self(format!("{node}.{pin}"))
    }
}

/// Aspect identity `<name>@<version>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AspectId {
    raw: String,
    split: usize,
}

impl AspectId {
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        let raw = id.into();
        validate("aspect", &raw, MAX_ID_LEN)?;
        let fail = |reason: &str| IdError {
            kind: "aspect",
            id: raw.clone(),
            reason: reason.to_string(),
        };
        if raw.matches('@').count() != 1 {
            return Err(fail("must have the form <name>@<version>"));
        }
        let split = raw.find('@').ok_or_else(|| fail("missing '@'"))?;
        if split == 0 || split + 1 == raw.len() {
            return Err(fail("name and version must be non-empty"));
        }
        Ok(Self { raw, split })
    }

    /// Identity of an aspect shipped with this crate.
    pub(crate) fn from_static(raw: &'static str) -> Self {
        let split = raw.find('@').unwrap_or(0);
        Self {
            raw: raw.to_string(),
            split,
        }
    }

    pub fn name(&self) -> &str {
        &self.raw[..self.split]
    }

    pub fn version(&self) -> &str {
        &self.raw[self.split + 1..]
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl TryFrom<String> for AspectId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for AspectId {
    type Error = IdError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AspectId> for String {
    fn from(value: AspectId) -> Self {
        value.raw
    }
}

impl fmt::Display for AspectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_reject_empty_and_odd_characters() {
        assert!(SlotId::new("").is_err());
        assert!(SlotId::new("has space").is_err());
        assert!(SlotId::new("x".repeat(129)).is_err());
        assert_eq!(SlotId::new("adder-1").unwrap().as_str(), "adder-1");
    }

    #[test]
    fn ids_validate_on_deserialize() {
        let ok: WireId = serde_json::from_str("\"w.sum\"").unwrap();
        assert_eq!(ok.as_str(), "w.sum");
        assert!(serde_json::from_str::<WireId>("\"bad wire\"").is_err());
    }

    #[test]
    fn aspect_id_splits_name_and_version() {
        let id = AspectId::new("rateLimit@1").unwrap();
        assert_eq!(id.name(), "rateLimit");
        assert_eq!(id.version(), "1");
        assert!(AspectId::new("tap").is_err());
        assert!(AspectId::new("tap@").is_err());
        assert!(AspectId::new("@1").is_err());
        assert!(AspectId::new("a@b@c").is_err());
    }

    #[test]
    fn derived_ids_are_deterministic() {
        let slot = SlotId::new("sum").unwrap();
        let gadget = GadgetId::new("adder").unwrap();
        let node = NodeId::for_occupant(&slot, &gadget);
        assert_eq!(node.as_str(), "n:sum/adder");
        let pin = PinId::new("out").unwrap();
        assert_eq!(ContactId::for_pin(&node, &pin).as_str(), "n:sum/adder.out");

        let wire = WireId::new("w1").unwrap();
        let aspect = AspectId::new("tap@1").unwrap();
        assert_eq!(NodeId::for_shim(&wire, 0, &aspect).as_str(), "s:w1/0:tap");
        assert_eq!(EdgeId::for_wire(&wire, 2).as_str(), "e:w1/2");
    }

    #[test]
    fn derived_ids_escape_separators_in_components() {
        let id = |slot: &str, gadget: &str| {
            NodeId::for_occupant(&SlotId::new(slot).unwrap(), &GadgetId::new(gadget).unwrap())
        };
        assert_eq!(id("a/b", "c").as_str(), "n:a*sb/c");
        assert_eq!(id("a", "b/c").as_str(), "n:a/b*sc");
        assert_ne!(id("a*s", "b"), id("a/", "b"));

        let dotted = ContactId::for_pin(&id("s", "g.x"), &PinId::new("y").unwrap());
        let plain = ContactId::for_pin(&id("s", "g"), &PinId::new("x.y").unwrap());
        assert_ne!(dotted, plain);

        let wire = WireId::new("w/0:tap").unwrap();
        let aspect = AspectId::new("tap@1").unwrap();
        assert_eq!(NodeId::for_shim(&wire, 0, &aspect).as_str(), "s:w*s0:tap/0:tap");
    }

    #[test]
    fn derived_ids_from_maximal_components_stay_valid() {
        let long = "/".repeat(MAX_ID_LEN);
        let node = NodeId::for_occupant(&SlotId::new(&long).unwrap(), &GadgetId::new(&long).unwrap());
        let pin = PinId::new("p".repeat(MAX_ID_LEN)).unwrap();
        let contact = ContactId::for_pin(&node, &pin);
        assert!(contact.as_str().len() > MAX_ID_LEN);
        assert_eq!(ContactId::new(contact.as_str()).unwrap(), contact);
        assert_eq!(NodeId::new(node.as_str()).unwrap(), node);
        assert!(SlotId::new(node.as_str()).is_err());
    }
}
