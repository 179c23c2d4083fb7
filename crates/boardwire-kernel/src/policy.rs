//! Board policy and access control.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::id::{AspectId, PrincipalId};

/// Grant key matching every aspect id.
pub const WILDCARD_GRANT: &str = "*";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acl: Option<Acl>,
    /// Policy keys this crate does not interpret, kept verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acl {
    #[serde(default)]
    pub mutate_board: BTreeSet<PrincipalId>,
    #[serde(default)]
    pub aspect_grants: BTreeMap<String, BTreeSet<PrincipalId>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    MutateBoard,
    Aspect(AspectId),
}

impl Policy {
    pub fn with_acl(acl: Acl) -> Self {
        Self {
            acl: Some(acl),
            extra: BTreeMap::new(),
        }
    }

    /// Check that `principal` may run a plan installing `aspects`.
    ///
    /// Without an ACL everything is allowed.
    pub fn authorize<'a>(
        &self,
        principal: &PrincipalId,
        aspects: impl IntoIterator<Item = &'a AspectId>,
    ) -> Result<(), Denial> {
        let Some(acl) = &self.acl else {
            return Ok(());
        };
        if !acl.mutate_board.contains(principal) {
            return Err(Denial::MutateBoard);
        }
        for aspect in aspects {
            if !acl.may_install(principal, aspect) {
                return Err(Denial::Aspect(aspect.clone()));
            }
        }
        Ok(())
    }
}

impl Acl {
    pub fn may_install(&self, principal: &PrincipalId, aspect: &AspectId) -> bool {
        [aspect.as_str(), WILDCARD_GRANT].iter().any(|key| {
            self.aspect_grants
                .get(*key)
                .is_some_and(|principals| principals.contains(principal))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn principal(s: &str) -> PrincipalId {
        PrincipalId::new(s).unwrap()
    }

    #[test]
    fn no_acl_allows_everything() {
        let tap = AspectId::new("tap@1").unwrap();
        assert!(Policy::default().authorize(&principal("anyone"), [&tap]).is_ok());
    }

    #[test]
    fn acl_checks_board_then_aspect_grants() {
        let policy: Policy = serde_json::from_value(json!({
            "acl": {
                "mutateBoard": ["ops", "dev"],
                "aspectGrants": {"tap@1": ["dev"], "*": ["ops"]}
            },
            "owner": "team-a"
        }))
        .unwrap();
        let tap = AspectId::new("tap@1").unwrap();
        let rate = AspectId::new("rateLimit@1").unwrap();

        assert_eq!(
            policy.authorize(&principal("guest"), []),
            Err(Denial::MutateBoard)
        );
        assert!(policy.authorize(&principal("dev"), [&tap]).is_ok());
        assert_eq!(
            policy.authorize(&principal("dev"), [&rate]),
            Err(Denial::Aspect(rate.clone()))
        );
        assert!(policy.authorize(&principal("ops"), [&tap, &rate]).is_ok());
        assert_eq!(policy.extra.get("owner"), Some(&json!("team-a")));
    }
}
