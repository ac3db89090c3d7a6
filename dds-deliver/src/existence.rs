//! Classifies a target key against both stores before any work is done.
//!
//! | in_db | in_bucket | outcome                                     |
//! |-------|-----------|---------------------------------------------|
//! | no    | no        | proceed                                     |
//! | yes   | no        | proceed with overwrite, else "registered"   |
//! | no    | yes       | always rejected: the stores have diverged   |
//! | yes   | yes       | proceed with overwrite, else "delivered"    |

use crate::error::{DeliveryError, DeliveryResult};
use crate::store::{MetadataStore, ObjectStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Presence {
    pub in_db: bool,
    pub in_bucket: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classification {
    Proceed,
    AlreadyRegistered,
    AlreadyDelivered,
    /// Object stored without a metadata entry. Never resolved automatically.
    Diverged,
}

impl Classification {
    pub fn from_presence(presence: Presence, overwrite: bool) -> Self {
        match (presence.in_db, presence.in_bucket) {
            (false, false) => Classification::Proceed,
            (false, true) => Classification::Diverged,
            (true, false) if overwrite => Classification::Proceed,
            (true, false) => Classification::AlreadyRegistered,
            (true, true) if overwrite => Classification::Proceed,
            (true, true) => Classification::AlreadyDelivered,
        }
    }

    /// Rejection error for `key`, or `Ok` when the file may proceed.
    pub fn into_result(self, key: &str) -> DeliveryResult<()> {
        match self {
            Classification::Proceed => Ok(()),
            Classification::AlreadyRegistered => Err(DeliveryError::Exists(format!(
                "{key} is already registered; use overwrite to replace it"
            ))),
            Classification::AlreadyDelivered => Err(DeliveryError::Exists(format!(
                "{key} is already delivered; use overwrite to replace it"
            ))),
            Classification::Diverged => Err(DeliveryError::Consistency(format!(
                "{key} exists in storage but is not registered; contact support"
            ))),
        }
    }
}

pub struct ExistenceChecker<'a> {
    pub metadata: &'a dyn MetadataStore,
    pub objects: &'a dyn ObjectStore,
    pub project_id: &'a str,
    pub bucket: &'a str,
}

impl ExistenceChecker<'_> {
    pub async fn presence(&self, key: &str) -> DeliveryResult<Presence> {
        let in_db = self.metadata.file(self.project_id, key).await?.is_some();
        let in_bucket = self.objects.exists(self.bucket, key).await?;
        Ok(Presence { in_db, in_bucket })
    }

    /// Checks `key` and returns the rejection, if any.
    pub async fn check(&self, key: &str, overwrite: bool) -> DeliveryResult<()> {
        let presence = self.presence(key).await?;
        Classification::from_presence(presence, overwrite).into_result(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix() {
        let cases = [
            (false, false, false, Classification::Proceed),
            (false, false, true, Classification::Proceed),
            (true, false, false, Classification::AlreadyRegistered),
            (true, false, true, Classification::Proceed),
            (false, true, false, Classification::Diverged),
            (false, true, true, Classification::Diverged),
            (true, true, false, Classification::AlreadyDelivered),
            (true, true, true, Classification::Proceed),
        ];
        for (in_db, in_bucket, overwrite, expected) in cases {
            let got = Classification::from_presence(Presence { in_db, in_bucket }, overwrite);
            assert_eq!(got, expected, "in_db={in_db} in_bucket={in_bucket} overwrite={overwrite}");
        }
    }

    #[test]
    fn diverged_is_consistency_error() {
        let err = Classification::Diverged.into_result("p/a.c4gh").unwrap_err();
        assert!(matches!(err, DeliveryError::Consistency(_)));
        assert!(err.to_string().contains("contact support"));
    }
}
