//! Security configuration value objects.
//!
//! Roles, domains and ACLs describe which identities may perform which
//! operations on which parts of the key space. They carry no network
//! behavior; they are validated here and converted into the `Security`
//! command body by the administrative tooling that sends them.

use crate::error::ProtocolError;
use crate::message::{Algorithm, Permission, Security, SecurityAcl, SecurityScope};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Default identity of a freshly created ACL.
pub const DEFAULT_IDENTITY: i64 = 1;

/// Development default secret shared by drives out of the box.
pub const DEFAULT_KEY: &str = "asdfasdf";

/// Operation classes an identity may be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Read,
    Write,
    Delete,
    Range,
    Setup,
    P2pop,
    Getlog,
    Security,
}

impl Role {
    /// Every role, in wire-code order.
    pub const ALL: [Role; 8] = [
        Role::Read,
        Role::Write,
        Role::Delete,
        Role::Range,
        Role::Setup,
        Role::P2pop,
        Role::Getlog,
        Role::Security,
    ];

    /// Returns the wire permission code.
    pub fn code(&self) -> i32 {
        self.permission() as i32
    }

    pub fn permission(&self) -> Permission {
        match self {
            Role::Read => Permission::Read,
            Role::Write => Permission::Write,
            Role::Delete => Permission::Delete,
            Role::Range => Permission::Range,
            Role::Setup => Permission::Setup,
            Role::P2pop => Permission::P2pop,
            Role::Getlog => Permission::Getlog,
            Role::Security => Permission::Security,
        }
    }

    /// Parses a wire permission code. Code 6 is unassigned.
    pub fn from_code(code: i32) -> Result<Self, ProtocolError> {
        Role::ALL
            .into_iter()
            .find(|r| r.code() == code)
            .ok_or(ProtocolError::UnknownCode { kind: "role", code })
    }
}

/// Integrity algorithms an ACL may select for its HMAC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntegrityAlgorithm {
    #[default]
    Sha1,
    Sha2,
    Sha3,
    Crc32,
    Crc64,
}

impl IntegrityAlgorithm {
    pub fn algorithm(&self) -> Algorithm {
        match self {
            IntegrityAlgorithm::Sha1 => Algorithm::Sha1,
            IntegrityAlgorithm::Sha2 => Algorithm::Sha2,
            IntegrityAlgorithm::Sha3 => Algorithm::Sha3,
            IntegrityAlgorithm::Crc32 => Algorithm::Crc32,
            IntegrityAlgorithm::Crc64 => Algorithm::Crc64,
        }
    }

    /// Parses a wire algorithm code. Codes 6-99 are reserved and 100+ are
    /// private; neither is accepted.
    pub fn from_code(code: i32) -> Result<Self, ProtocolError> {
        match code {
            1 => Ok(IntegrityAlgorithm::Sha1),
            2 => Ok(IntegrityAlgorithm::Sha2),
            3 => Ok(IntegrityAlgorithm::Sha3),
            4 => Ok(IntegrityAlgorithm::Crc32),
            5 => Ok(IntegrityAlgorithm::Crc64),
            _ => Err(ProtocolError::UnknownCode {
                kind: "integrity algorithm",
                code,
            }),
        }
    }
}

/// A set of roles, optionally restricted to keys holding `value` at `offset`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    #[serde(default)]
    pub roles: BTreeSet<Role>,
    #[serde(default)]
    pub tls_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Vec<u8>>,
}

impl Domain {
    pub fn new(roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            roles: roles.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Replaces the roles from raw wire codes, rejecting unknown codes.
    pub fn set_role_codes(&mut self, codes: &[i32]) -> Result<(), ProtocolError> {
        let roles = codes
            .iter()
            .map(|c| Role::from_code(*c))
            .collect::<Result<BTreeSet<_>, _>>()?;
        self.roles = roles;
        Ok(())
    }

    pub fn with_tls_required(mut self, required: bool) -> Self {
        self.tls_required = required;
        self
    }

    /// Restricts the domain to keys whose bytes at `offset` equal `value`.
    pub fn with_restriction(mut self, offset: i64, value: impl Into<Vec<u8>>) -> Self {
        self.offset = Some(offset);
        self.value = Some(value.into());
        self
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        if let Some(offset) = self.offset {
            if offset < 0 {
                return Err(ProtocolError::InvalidSecurity(format!(
                    "domain offset must be non-negative, got {}",
                    offset
                )));
            }
        }
        if self.value.is_some() && self.offset.is_none() {
            return Err(ProtocolError::InvalidSecurity(
                "domain value restriction requires an offset".to_string(),
            ));
        }
        Ok(())
    }

    fn to_scope(&self) -> SecurityScope {
        SecurityScope {
            offset: self.offset,
            value: self.value.clone(),
            permission: self.roles.iter().map(Role::code).collect(),
            tls_required: Some(self.tls_required),
        }
    }
}

/// Access control entry for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl {
    pub identity: i64,
    pub key: Vec<u8>,
    #[serde(default)]
    pub hmac_algorithm: IntegrityAlgorithm,
    #[serde(default)]
    pub domains: Vec<Domain>,
}

impl Default for Acl {
    fn default() -> Self {
        Self {
            identity: DEFAULT_IDENTITY,
            key: DEFAULT_KEY.as_bytes().to_vec(),
            hmac_algorithm: IntegrityAlgorithm::Sha1,
            domains: Vec::new(),
        }
    }
}

impl Acl {
    pub fn new(identity: i64, key: impl Into<Vec<u8>>) -> Self {
        Self {
            identity,
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn with_domain(mut self, domain: Domain) -> Self {
        self.domains.push(domain);
        self
    }

    pub fn with_hmac_algorithm(mut self, algorithm: IntegrityAlgorithm) -> Self {
        self.hmac_algorithm = algorithm;
        self
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.key.is_empty() {
            return Err(ProtocolError::InvalidSecurity(format!(
                "ACL for identity {} has an empty key",
                self.identity
            )));
        }
        for domain in &self.domains {
            domain.validate()?;
        }
        Ok(())
    }

    /// Converts the ACL into its wire form.
    pub fn to_wire(&self) -> SecurityAcl {
        SecurityAcl {
            identity: Some(self.identity),
            key: Some(self.key.clone()),
            hmac_algorithm: Some(self.hmac_algorithm.algorithm() as i32),
            scope: self.domains.iter().map(Domain::to_scope).collect(),
        }
    }

    /// Validates a list of ACLs and builds the `Security` body carrying them.
    pub fn security_body(acls: &[Acl]) -> Result<Security, ProtocolError> {
        for acl in acls {
            acl.validate()?;
        }
        Ok(Security {
            acl: acls.iter().map(Acl::to_wire).collect(),
        })
    }

    /// Parses a JSON list of ACLs and validates each entry.
    pub fn list_from_json(json: &str) -> Result<Vec<Acl>, ProtocolError> {
        let acls: Vec<Acl> = serde_json::from_str(json)
            .map_err(|e| ProtocolError::InvalidSecurity(format!("invalid ACL JSON: {}", e)))?;
        for acl in &acls {
            acl.validate()?;
        }
        Ok(acls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_codes() {
        assert_eq!(Role::Read.code(), 0);
        assert_eq!(Role::P2pop.code(), 5);
        assert_eq!(Role::Getlog.code(), 7);
        assert_eq!(Role::Security.code(), 8);
        assert_eq!(Role::from_code(3).unwrap(), Role::Range);
        assert!(matches!(
            Role::from_code(6),
            Err(ProtocolError::UnknownCode { code: 6, .. })
        ));
    }

    #[test]
    fn test_integrity_algorithm_codes() {
        assert_eq!(IntegrityAlgorithm::from_code(1).unwrap(), IntegrityAlgorithm::Sha1);
        assert_eq!(IntegrityAlgorithm::Crc64.algorithm() as i32, 5);
        assert!(IntegrityAlgorithm::from_code(6).is_err());
        assert!(IntegrityAlgorithm::from_code(100).is_err());
    }

    #[test]
    fn test_domain_set_role_codes_rejects_unknown() {
        let mut domain = Domain::new([Role::Read]);
        assert!(domain.set_role_codes(&[0, 1, 42]).is_err());
        // Roles are untouched on failure.
        assert_eq!(domain.roles, BTreeSet::from([Role::Read]));

        domain.set_role_codes(&[1, 2]).unwrap();
        assert_eq!(domain.roles, BTreeSet::from([Role::Write, Role::Delete]));
    }

    #[test]
    fn test_domain_validation() {
        assert!(Domain::new([Role::Read]).validate().is_ok());
        assert!(Domain::new([Role::Read])
            .with_restriction(4, b"ab".to_vec())
            .validate()
            .is_ok());
        assert!(Domain::new([Role::Read])
            .with_restriction(-1, b"ab".to_vec())
            .validate()
            .is_err());

        let value_only = Domain {
            value: Some(b"x".to_vec()),
            ..Default::default()
        };
        assert!(value_only.validate().is_err());
    }

    #[test]
    fn test_acl_defaults() {
        let acl = Acl::default();
        assert_eq!(acl.identity, 1);
        assert_eq!(acl.key, b"asdfasdf");
        assert_eq!(acl.hmac_algorithm, IntegrityAlgorithm::Sha1);
        assert!(acl.domains.is_empty());
    }

    #[test]
    fn test_acl_rejects_empty_key() {
        let acl = Acl::new(100, Vec::new());
        assert!(matches!(
            acl.validate(),
            Err(ProtocolError::InvalidSecurity(_))
        ));
    }

    #[test]
    fn test_security_body() {
        let acl = Acl::new(100, "secret")
            .with_domain(Domain::new([Role::Read, Role::Range]).with_tls_required(true));
        let body = Acl::security_body(&[acl]).unwrap();

        assert_eq!(body.acl.len(), 1);
        let wire = &body.acl[0];
        assert_eq!(wire.identity, Some(100));
        assert_eq!(wire.key.as_deref(), Some(&b"secret"[..]));
        assert_eq!(wire.hmac_algorithm(), Algorithm::Sha1);
        assert_eq!(wire.scope[0].permission, vec![0, 3]);
        assert_eq!(wire.scope[0].tls_required, Some(true));
    }

    #[test]
    fn test_acl_list_from_json() {
        let json = r#"[
            {"identity": 7, "key": [107, 101, 121],
             "domains": [{"roles": ["READ", "WRITE"], "tls_required": false}]}
        ]"#;
        let acls = Acl::list_from_json(json).unwrap();
        assert_eq!(acls[0].identity, 7);
        assert_eq!(acls[0].key, b"key");
        assert_eq!(acls[0].hmac_algorithm, IntegrityAlgorithm::Sha1);
        assert!(acls[0].domains[0].roles.contains(&Role::Write));

        let bad = r#"[{"identity": 7, "key": []}]"#;
        assert!(Acl::list_from_json(bad).is_err());
    }
}
