// Declarative authorization policy for the fixture backend: users, roles,
// index grants with field-level and document-level restrictions.

use std::collections::HashMap;

/// Index name that matches every index.
pub const ALL_INDICES: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldGrant {
    All,
    Only(Vec<String>),
    Except(Vec<String>),
}

impl FieldGrant {
    fn allows(&self, column: &str) -> bool {
        match self {
            FieldGrant::All => true,
            FieldGrant::Only(fields) => fields.iter().any(|f| f.eq_ignore_ascii_case(column)),
            FieldGrant::Except(fields) => !fields.iter().any(|f| f.eq_ignore_ascii_case(column)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexGrant {
    pub index: String,
    pub fields: FieldGrant,
    /// SQL predicate a row must satisfy to be visible.
    pub row_filter: Option<String>,
}

impl IndexGrant {
    pub fn read(index: &str) -> Self {
        Self {
            index: index.to_string(),
            fields: FieldGrant::All,
            row_filter: None,
        }
    }

    pub fn with_fields(mut self, fields: FieldGrant) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_row_filter(mut self, predicate: &str) -> Self {
        self.row_filter = Some(predicate.to_string());
        self
    }

    fn covers(&self, index: &str) -> bool {
        self.index == ALL_INDICES || self.index.eq_ignore_ascii_case(index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub name: String,
    /// May run the connection probe.
    pub connect: bool,
    /// May run SQL at all.
    pub sql: bool,
    pub grants: Vec<IndexGrant>,
}

impl Role {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            connect: true,
            sql: true,
            grants: Vec::new(),
        }
    }

    pub fn superuser(name: &str) -> Self {
        Self::new(name).grant(IndexGrant::read(ALL_INDICES))
    }

    /// Neither connect nor SQL privileges.
    pub fn nothing(name: &str) -> Self {
        Self {
            connect: false,
            sql: false,
            ..Self::new(name)
        }
    }

    pub fn grant(mut self, grant: IndexGrant) -> Self {
        self.grants.push(grant);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct UserEntry {
    secret: String,
    roles: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Policy {
    roles: HashMap<String, Role>,
    users: HashMap<String, UserEntry>,
}

impl Policy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_role(&mut self, role: Role) -> Result<(), String> {
        if self.roles.contains_key(&role.name) {
            return Err(format!("role \"{}\" already exists", role.name));
        }
        self.roles.insert(role.name.clone(), role);
        Ok(())
    }

    pub fn add_user(&mut self, principal: &str, secret: &str, roles: &[&str]) -> Result<(), String> {
        if self.users.contains_key(principal) {
            return Err(format!("user \"{}\" already exists", principal));
        }
        if let Some(missing) = roles.iter().find(|r| !self.roles.contains_key(**r)) {
            return Err(format!("role \"{}\" does not exist", missing));
        }
        self.users.insert(
            principal.to_string(),
            UserEntry {
                secret: secret.to_string(),
                roles: roles.iter().map(|r| r.to_string()).collect(),
            },
        );
        Ok(())
    }

    /// Check credentials and fold the user's roles into effective privileges.
    pub fn authenticate(&self, principal: &str, secret: &str) -> Option<Principal> {
        let user = self.users.get(principal)?;
        if user.secret != secret {
            return None;
        }
        let mut effective = Principal {
            name: principal.to_string(),
            connect: false,
            sql: false,
            grants: Vec::new(),
        };
        for role in user.roles.iter().filter_map(|r| self.roles.get(r)) {
            effective.connect |= role.connect;
            effective.sql |= role.sql;
            effective.grants.extend(role.grants.iter().cloned());
        }
        Some(effective)
    }
}

/// An authenticated user with the union of its roles' privileges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub name: String,
    pub connect: bool,
    pub sql: bool,
    pub grants: Vec<IndexGrant>,
}

impl Principal {
    pub fn can_read(&self, index: &str) -> bool {
        self.grants.iter().any(|g| g.covers(index))
    }

    /// Columns of `index` the principal may see, in table order.
    pub fn visible_columns(&self, index: &str, columns: &[String]) -> Vec<String> {
        let grants: Vec<&IndexGrant> = self.grants.iter().filter(|g| g.covers(index)).collect();
        columns
            .iter()
            .filter(|c| grants.iter().any(|g| g.fields.allows(c)))
            .cloned()
            .collect()
    }

    /// Combined document-level filter, `None` when some grant sees every row.
    pub fn row_filter(&self, index: &str) -> Option<String> {
        let mut filters = Vec::new();
        for grant in self.grants.iter().filter(|g| g.covers(index)) {
            match &grant.row_filter {
                None => return None,
                Some(predicate) => filters.push(format!("({})", predicate)),
            }
        }
        if filters.is_empty() {
            None
        } else {
            Some(filters.join(" OR "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn policy() -> Policy {
        let mut policy = Policy::new();
        policy.add_role(Role::superuser("superuser")).unwrap();
        policy
            .add_role(Role::new("read_test_a").grant(
                IndexGrant::read("test").with_fields(FieldGrant::Only(cols(&["a"]))),
            ))
            .unwrap();
        policy
            .add_role(Role::new("read_test_without_c_3").grant(
                IndexGrant::read("test").with_row_filter("c != 3"),
            ))
            .unwrap();
        policy
            .add_role(Role::new("read_test_b_only_4s").grant(
                IndexGrant::read("test").with_row_filter("a = 4"),
            ))
            .unwrap();
        policy.add_role(Role::nothing("read_nothing")).unwrap();
        policy.add_user("admin", "pw", &["superuser"]).unwrap();
        policy.add_user("only_a", "pw", &["read_test_a"]).unwrap();
        policy.add_user("two_filters", "pw", &["read_test_without_c_3", "read_test_b_only_4s"]).unwrap();
        policy.add_user("no_access", "pw", &["read_nothing"]).unwrap();
        policy
    }

    #[test]
    fn test_authenticate_checks_secret() {
        let policy = policy();
        assert!(policy.authenticate("admin", "pw").is_some());
        assert!(policy.authenticate("admin", "wrong").is_none());
        assert!(policy.authenticate("nobody", "pw").is_none());
    }

    #[test]
    fn test_superuser_reads_everything() {
        let admin = policy().authenticate("admin", "pw").unwrap();
        assert!(admin.can_read("test"));
        assert!(admin.can_read("anything"));
        assert_eq!(admin.visible_columns("test", &cols(&["a", "b"])), cols(&["a", "b"]));
        assert_eq!(admin.row_filter("test"), None);
    }

    #[test]
    fn test_field_level_grant() {
        let only_a = policy().authenticate("only_a", "pw").unwrap();
        assert!(only_a.can_read("test"));
        assert!(!only_a.can_read("bort"));
        assert_eq!(only_a.visible_columns("test", &cols(&["a", "b", "c"])), cols(&["a"]));
    }

    #[test]
    fn test_row_filters_are_ored() {
        let user = policy().authenticate("two_filters", "pw").unwrap();
        assert_eq!(user.row_filter("test").as_deref(), Some("(c != 3) OR (a = 4)"));
    }

    #[test]
    fn test_nothing_role() {
        let user = policy().authenticate("no_access", "pw").unwrap();
        assert!(!user.connect);
        assert!(!user.sql);
        assert!(!user.can_read("test"));
    }

    #[test]
    fn test_duplicate_and_missing_roles_rejected() {
        let mut policy = policy();
        assert!(policy.add_role(Role::new("superuser")).is_err());
        assert!(policy.add_user("x", "pw", &["no_such_role"]).is_err());
        assert!(policy.add_user("admin", "pw", &["superuser"]).is_err());
    }
}
