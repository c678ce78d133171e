//! Resource identifier helpers for subvolumes and their parent volumes.
//!
//! Subvolume identifiers follow a fixed layout:
//!
//! ```text
//! /subscriptions/{s}/resourceGroups/{rg}/providers/Microsoft.NetApp/
//!     netAppAccounts/{a}/capacityPools/{p}/volumes/{v}/subvolumes/{name}
//! ```
//!
//! Because the layout is deterministic, the identifier of a snapshot or a
//! temporary clone can be derived from its sibling's identifier plus its
//! own creation token.

use super::ApiError;

const PROVIDER: &str = "Microsoft.NetApp";

/// Components of a parsed subvolume resource identifier.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubvolumeIdParts {
    /// Subscription that owns the resource group.
    pub subscription: String,
    /// Resource group name.
    pub resource_group: String,
    /// Resource provider namespace.
    pub provider: String,
    /// NetApp account name.
    pub netapp_account: String,
    /// Capacity pool name.
    pub capacity_pool: String,
    /// Parent volume name.
    pub volume: String,
    /// Subvolume creation token.
    pub subvolume: String,
}

impl SubvolumeIdParts {
    /// Returns the identifier of a sibling subvolume in the same parent
    /// volume.
    #[must_use]
    pub fn sibling(&self, creation_token: &str) -> String {
        subvolume_id(
            &self.subscription,
            &self.resource_group,
            &self.netapp_account,
            &self.capacity_pool,
            &self.volume,
            creation_token,
        )
    }

    /// Returns the full name of the parent volume.
    #[must_use]
    pub fn volume_full_name(&self) -> String {
        volume_full_name(
            &self.resource_group,
            &self.netapp_account,
            &self.capacity_pool,
            &self.volume,
        )
    }
}

/// Builds a subvolume resource identifier.
#[must_use]
pub fn subvolume_id(
    subscription: &str,
    resource_group: &str,
    netapp_account: &str,
    capacity_pool: &str,
    volume: &str,
    subvolume: &str,
) -> String {
    format!(
        "/subscriptions/{subscription}/resourceGroups/{resource_group}/providers/{PROVIDER}\
         /netAppAccounts/{netapp_account}/capacityPools/{capacity_pool}/volumes/{volume}\
         /subvolumes/{subvolume}"
    )
}

/// Builds the full name of a parent volume (`rg/account/pool/volume`).
#[must_use]
pub fn volume_full_name(
    resource_group: &str,
    netapp_account: &str,
    capacity_pool: &str,
    volume: &str,
) -> String {
    format!("{resource_group}/{netapp_account}/{capacity_pool}/{volume}")
}

/// Parses a subvolume resource identifier into its components.
///
/// # Errors
///
/// Returns [`ApiError::InvalidResourceId`] when the identifier does not
/// match the subvolume layout or any component is empty.
pub fn parse_subvolume_id(id: &str) -> Result<SubvolumeIdParts, ApiError> {
    let invalid = || ApiError::InvalidResourceId(id.to_owned());
    let segments: Vec<&str> = id.trim_start_matches('/').split('/').collect();
    let [
        "subscriptions",
        subscription,
        "resourceGroups",
        resource_group,
        "providers",
        provider,
        "netAppAccounts",
        netapp_account,
        "capacityPools",
        capacity_pool,
        "volumes",
        volume,
        "subvolumes",
        subvolume,
    ] = segments.as_slice()
    else {
        return Err(invalid());
    };

    let parts = [
        subscription,
        resource_group,
        provider,
        netapp_account,
        capacity_pool,
        volume,
        subvolume,
    ];
    if parts.iter().any(|part| part.is_empty()) {
        return Err(invalid());
    }

    Ok(SubvolumeIdParts {
        subscription: (*subscription).to_owned(),
        resource_group: (*resource_group).to_owned(),
        provider: (*provider).to_owned(),
        netapp_account: (*netapp_account).to_owned(),
        capacity_pool: (*capacity_pool).to_owned(),
        volume: (*volume).to_owned(),
        subvolume: (*subvolume).to_owned(),
    })
}

/// Splits a parent volume full name into `(rg, account, pool, volume)`.
///
/// # Errors
///
/// Returns [`ApiError::InvalidResourceId`] when the name does not have
/// exactly four non-empty components.
pub fn parse_volume_full_name(
    full_name: &str,
) -> Result<(String, String, String, String), ApiError> {
    let segments: Vec<&str> = full_name.split('/').collect();
    match segments.as_slice() {
        [rg, account, pool, volume]
            if [rg, account, pool, volume].iter().all(|part| !part.is_empty()) =>
        {
            Ok((
                (*rg).to_owned(),
                (*account).to_owned(),
                (*pool).to_owned(),
                (*volume).to_owned(),
            ))
        }
        _ => Err(ApiError::InvalidResourceId(full_name.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const ID: &str = "/subscriptions/sub-1/resourceGroups/rg-1/providers/Microsoft.NetApp\
                      /netAppAccounts/acct/capacityPools/pool/volumes/vol/subvolumes/pvc-1";

    #[test]
    fn builds_and_parses_identifiers() {
        let id = subvolume_id("sub-1", "rg-1", "acct", "pool", "vol", "pvc-1");
        assert_eq!(id, ID);

        let parts = parse_subvolume_id(&id).expect("identifier should parse");
        assert_eq!(parts.subscription, "sub-1");
        assert_eq!(parts.resource_group, "rg-1");
        assert_eq!(parts.provider, PROVIDER);
        assert_eq!(parts.netapp_account, "acct");
        assert_eq!(parts.capacity_pool, "pool");
        assert_eq!(parts.volume, "vol");
        assert_eq!(parts.subvolume, "pvc-1");
        assert_eq!(parts.volume_full_name(), "rg-1/acct/pool/vol");
    }

    #[test]
    fn sibling_replaces_only_the_creation_token() {
        let parts = parse_subvolume_id(ID).expect("identifier should parse");
        let sibling = parts.sibling("snap--abc12");
        assert!(sibling.ends_with("/volumes/vol/subvolumes/snap--abc12"));
        assert!(sibling.starts_with("/subscriptions/sub-1/resourceGroups/rg-1/"));
    }

    #[rstest]
    #[case("")]
    #[case("/subscriptions/sub-1/resourceGroups/rg-1")]
    #[case("/subscriptions//resourceGroups/rg-1/providers/Microsoft.NetApp/netAppAccounts/a/capacityPools/p/volumes/v/subvolumes/s")]
    #[case("/subscriptions/s/resourceGroups/rg/providers/Microsoft.NetApp/netAppAccounts/a/capacityPools/p/volumes/v/files/s")]
    fn rejects_malformed_identifiers(#[case] id: &str) {
        assert_eq!(
            parse_subvolume_id(id),
            Err(ApiError::InvalidResourceId(id.to_owned()))
        );
    }

    #[test]
    fn parses_volume_full_names() {
        let parsed = parse_volume_full_name("rg/acct/pool/vol").expect("full name should parse");
        assert_eq!(
            parsed,
            (
                String::from("rg"),
                String::from("acct"),
                String::from("pool"),
                String::from("vol")
            )
        );
        assert!(parse_volume_full_name("rg/acct/pool").is_err());
        assert!(parse_volume_full_name("rg//pool/vol").is_err());
    }
}
