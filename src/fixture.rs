// Standard dataset and users the security scenarios run against.

use crate::backend::sqlite::SqliteBackend;
use crate::security::{FieldGrant, IndexGrant, Policy, Role};

pub const ADMIN: &str = "test_admin";
pub const ADMIN_SECRET: &str = "x-pack-test-password";
/// Shared by every restricted user.
pub const USER_SECRET: &str = "testpass";

/// Restricted users and what each one may see.
pub const FULL_ACCESS: &str = "full_access";
pub const ONLY_A: &str = "only_a";
pub const NOT_C: &str = "not_c";
pub const NO_3S: &str = "no_3s";
pub const WRONG_ACCESS: &str = "wrong_access";
pub const NO_ACCESS: &str = "no_access";

const SEED: &str = "
    CREATE TABLE test (a BIGINT, b BIGINT, c BIGINT);
    INSERT INTO test VALUES (1, 2, 3), (4, 5, 6);
    CREATE TABLE bort (a BIGINT, b BIGINT);
    INSERT INTO bort VALUES (1, 2), (3, 4);
    CREATE TABLE \".security\" (doc TEXT);
    INSERT INTO \".security\" VALUES ('internal');
";

/// Backend plus policy, ready to hand to a server.
pub struct Fixture {
    pub backend: SqliteBackend,
    pub policy: Policy,
}

impl Fixture {
    /// Open `path` and seed it when it holds no tables yet.
    pub fn open(path: &str) -> Result<Self, String> {
        let backend = SqliteBackend::new(path)?;
        if backend.table_names()?.is_empty() {
            seed(&backend)?;
        } else {
            tracing::info!("Reusing existing fixture data in {}", path);
        }
        Ok(Self { backend, policy: policy()? })
    }

    pub fn in_memory() -> Result<Self, String> {
        Self::open(":memory:")
    }
}

pub fn seed(backend: &SqliteBackend) -> Result<(), String> {
    backend.execute_batch(SEED)?;
    tracing::debug!("Seeded fixture tables");
    Ok(())
}

pub fn policy() -> Result<Policy, String> {
    let mut policy = Policy::new();
    policy.add_role(Role::superuser("superuser"))?;
    policy.add_role(Role::new("read_test").grant(IndexGrant::read("test")))?;
    policy.add_role(Role::new("read_test_a").grant(
        IndexGrant::read("test").with_fields(FieldGrant::Only(vec!["a".into()])),
    ))?;
    policy.add_role(Role::new("read_test_a_and_b").grant(
        IndexGrant::read("test").with_fields(FieldGrant::Except(vec!["c".into()])),
    ))?;
    policy.add_role(Role::new("read_test_without_c_3").grant(
        IndexGrant::read("test").with_row_filter("c != 3"),
    ))?;
    policy.add_role(Role::new("read_something_else").grant(IndexGrant::read("something_that_isnt_test")))?;
    policy.add_role(Role::nothing("read_nothing"))?;

    policy.add_user(ADMIN, ADMIN_SECRET, &["superuser"])?;
    policy.add_user(FULL_ACCESS, USER_SECRET, &["read_test"])?;
    policy.add_user(ONLY_A, USER_SECRET, &["read_test_a"])?;
    policy.add_user(NOT_C, USER_SECRET, &["read_test_a_and_b"])?;
    policy.add_user(NO_3S, USER_SECRET, &["read_test_without_c_3"])?;
    policy.add_user(WRONG_ACCESS, USER_SECRET, &["read_something_else"])?;
    policy.add_user(NO_ACCESS, USER_SECRET, &["read_nothing"])?;
    Ok(policy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_fixture_is_seeded() {
        let fixture = Fixture::in_memory().unwrap();
        assert_eq!(fixture.backend.table_names().unwrap(), vec![".security", "bort", "test"]);
        let rows = fixture.backend.query("SELECT * FROM test ORDER BY a").unwrap().rows;
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_every_user_authenticates() {
        let policy = policy().unwrap();
        assert!(policy.authenticate(ADMIN, ADMIN_SECRET).is_some());
        for user in [FULL_ACCESS, ONLY_A, NOT_C, NO_3S, WRONG_ACCESS, NO_ACCESS] {
            assert!(policy.authenticate(user, USER_SECRET).is_some(), "{}", user);
        }
    }

    #[test]
    fn test_restricted_users_cannot_see_security_index() {
        let policy = policy().unwrap();
        let user = policy.authenticate(FULL_ACCESS, USER_SECRET).unwrap();
        assert!(!user.can_read(".security"));
        let admin = policy.authenticate(ADMIN, ADMIN_SECRET).unwrap();
        assert!(admin.can_read(".security"));
    }
}
