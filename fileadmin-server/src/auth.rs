use crate::config::AppConfig;
use axum::http::HeaderMap;

/// Named permissions checked before any mutating operation. Authentication
/// itself happens upstream; the platform forwards the caller's identity and
/// roles in headers and this module only maps roles to capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    FileAccess,
    DbAccess,
    ManageOptions,
}

#[derive(Debug, Clone)]
pub struct ActorIdentity {
    pub id: i64,
    pub name: String,
    pub roles: Vec<String>,
    pub ip_address: String,
    pub user_agent: String,
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

impl ActorIdentity {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        // Proxies append to x-forwarded-for; the first entry is the client.
        let ip_address = header_str(headers, "x-real-ip")
            .or_else(|| {
                header_str(headers, "x-forwarded-for")
                    .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()))
            })
            .unwrap_or_else(|| "0.0.0.0".into());

        Self {
            id: header_str(headers, "x-actor-id")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            name: header_str(headers, "x-actor-name").unwrap_or_else(|| "anonymous".into()),
            roles: header_str(headers, "x-actor-roles")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            ip_address,
            user_agent: header_str(headers, "user-agent").unwrap_or_default(),
        }
    }
}

/// Role-intersection capability check, configured from the role lists in
/// `AppConfig`.
#[derive(Debug, Clone)]
pub struct CapabilityChecker {
    file_roles: Vec<String>,
    db_roles: Vec<String>,
    admin_roles: Vec<String>,
}

impl CapabilityChecker {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            file_roles: config.file_roles.clone(),
            db_roles: config.db_roles.clone(),
            admin_roles: config.admin_roles.clone(),
        }
    }

    pub fn has_capability(&self, actor: &ActorIdentity, capability: Capability) -> bool {
        let allowed = match capability {
            Capability::FileAccess => &self.file_roles,
            Capability::DbAccess => &self.db_roles,
            Capability::ManageOptions => &self.admin_roles,
        };
        actor.roles.iter().any(|r| allowed.contains(r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker() -> CapabilityChecker {
        CapabilityChecker {
            file_roles: vec!["editor".into(), "administrator".into()],
            db_roles: vec!["administrator".into()],
            admin_roles: vec!["administrator".into()],
        }
    }

    fn actor(roles: &[&str]) -> ActorIdentity {
        ActorIdentity {
            id: 1,
            name: "test".into(),
            roles: roles.iter().map(|s| s.to_string()).collect(),
            ip_address: "127.0.0.1".into(),
            user_agent: String::new(),
        }
    }

    #[test]
    fn test_role_intersection() {
        let c = checker();
        assert!(c.has_capability(&actor(&["editor"]), Capability::FileAccess));
        assert!(!c.has_capability(&actor(&["editor"]), Capability::DbAccess));
        assert!(c.has_capability(&actor(&["administrator"]), Capability::ManageOptions));
        assert!(!c.has_capability(&actor(&[]), Capability::FileAccess));
    }

    #[test]
    fn test_identity_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-actor-id", "42".parse().unwrap());
        headers.insert("x-actor-name", "alice".parse().unwrap());
        headers.insert("x-actor-roles", "administrator, editor".parse().unwrap());
        headers.insert("x-forwarded-for", "10.0.0.1, 10.0.0.2".parse().unwrap());

        let actor = ActorIdentity::from_headers(&headers);
        assert_eq!(actor.id, 42);
        assert_eq!(actor.name, "alice");
        assert_eq!(actor.roles, vec!["administrator", "editor"]);
        assert_eq!(actor.ip_address, "10.0.0.1");
    }
}
