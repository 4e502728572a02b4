//! Logged-in user, remembered across runs

use anyhow::Result;
use std::sync::Arc;

use crate::cache::{LocalCache, USER_KEY};
use crate::models::User;

pub struct Session {
    cache: Arc<LocalCache>,
    user: Option<User>,
}

impl Session {
    pub fn restore(cache: Arc<LocalCache>) -> Self {
        let user = cache.load_json::<User>(USER_KEY);
        Self { cache, user }
    }

    pub fn current(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn login(&mut self, user: User) -> Result<()> {
        self.cache.store_json(USER_KEY, &user)?;
        tracing::info!(user = %user.id, role = %user.role, "Logged in");
        self.user = Some(user);
        Ok(())
    }

    pub fn logout(&mut self) -> Result<()> {
        self.cache.remove(USER_KEY)?;
        if let Some(user) = self.user.take() {
            tracing::info!(user = %user.id, "Logged out");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn technician() -> User {
        User {
            id: "erkan".into(),
            name: "Erkan Usta".into(),
            role: Role::Technician,
        }
    }

    #[test]
    fn login_is_remembered() {
        let cache = Arc::new(LocalCache::open_in_memory().unwrap());
        Session::restore(cache.clone()).login(technician()).unwrap();

        let restored = Session::restore(cache);
        assert_eq!(restored.current(), Some(&technician()));
    }

    #[test]
    fn logout_clears_cache() {
        let cache = Arc::new(LocalCache::open_in_memory().unwrap());
        let mut session = Session::restore(cache.clone());
        session.login(technician()).unwrap();
        session.logout().unwrap();

        assert!(session.current().is_none());
        assert!(Session::restore(cache).current().is_none());
    }

    #[test]
    fn malformed_user_is_logged_out() {
        let cache = Arc::new(LocalCache::open_in_memory().unwrap());
        cache.put(USER_KEY, "\"just a string\"").unwrap();
        assert!(Session::restore(cache).current().is_none());
    }
}
