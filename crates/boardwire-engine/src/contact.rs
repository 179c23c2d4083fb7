//! Contacts: lattice-typed cells whose values only move up.

use std::collections::BTreeMap;

use boardwire_kernel::ContactId;
use boardwire_lattice::{Lattice, LatticeError, LatticeValue};

use crate::error::EngineError;

#[derive(Debug, Clone)]
pub struct Contact {
    pub id: ContactId,
    pub lattice: Lattice,
    pub value: Option<LatticeValue>,
}

impl Contact {
    /// Whether joining `incoming` would change the value.
    pub fn would_change(&self, incoming: &LatticeValue) -> bool {
        let current = self.value.clone().unwrap_or_else(|| self.lattice.bottom());
        match self.lattice.join(&current, incoming) {
            Ok(joined) => self.value.as_ref() != Some(&joined),
            Err(_) => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct ContactStore {
    contacts: BTreeMap<ContactId, Contact>,
}

impl ContactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: ContactId, lattice: Lattice) -> Result<(), EngineError> {
        if self.contacts.contains_key(&id) {
            return Err(EngineError::Realize(format!("contact {id} declared twice")));
        }
        self.contacts.insert(
            id.clone(),
            Contact {
                id,
                lattice,
                value: None,
            },
        );
        Ok(())
    }

    pub fn get(&self, id: &ContactId) -> Option<&Contact> {
        self.contacts.get(id)
    }

    /// Current value, `None` while unset or unknown.
    pub fn value(&self, id: &ContactId) -> Option<&LatticeValue> {
        self.contacts.get(id).and_then(|c| c.value.as_ref())
    }

    pub fn contains(&self, id: &ContactId) -> bool {
        self.contacts.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &ContactId> {
        self.contacts.keys()
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// Join `incoming` into the contact. Returns the new value when it
    /// differs from the old one, `None` when the join changed nothing.
    pub fn join(
        &mut self,
        id: &ContactId,
        incoming: &LatticeValue,
    ) -> Result<Option<LatticeValue>, EngineError> {
        let contact = self
            .contacts
            .get_mut(id)
            .ok_or_else(|| EngineError::ContactNotFound(id.clone()))?;
        let lattice_error = |source: LatticeError| EngineError::Lattice {
            contact: id.clone(),
            source,
        };
        if !contact.lattice.accepts(incoming) {
            return Err(lattice_error(LatticeError::KindMismatch {
                lattice: contact.lattice.name().to_string(),
                actual: incoming.shape().to_string(),
            }));
        }

        let current = contact
            .value
            .clone()
            .unwrap_or_else(|| contact.lattice.bottom());
        let joined = contact
            .lattice
            .join(&current, incoming)
            .map_err(lattice_error)?;
        if contact.value.as_ref() == Some(&joined) {
            return Ok(None);
        }
        contact.value = Some(joined.clone());
        Ok(Some(joined))
    }

    /// Every contact that holds a value.
    pub fn snapshot(&self) -> BTreeMap<ContactId, LatticeValue> {
        self.contacts
            .iter()
            .filter_map(|(id, c)| c.value.clone().map(|v| (id.clone(), v)))
            .collect()
    }
}
