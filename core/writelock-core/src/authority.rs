//! Admin capability check consumed by forced unlock.

use crate::types::UserId;

pub trait AdminAuthority {
    fn is_admin(&self, user_id: UserId) -> bool;
}

impl<F> AdminAuthority for F
where
    F: Fn(UserId) -> bool,
{
    fn is_admin(&self, user_id: UserId) -> bool {
        self(user_id)
    }
}

/// Fixed allow-list, typically `admin_user_ids` from the lock config.
#[derive(Debug, Clone, Default)]
pub struct AdminList {
    ids: Vec<UserId>,
}

impl AdminList {
    pub fn new(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            ids: ids.into_iter().map(UserId).collect(),
        }
    }
}

impl AdminAuthority for AdminList {
    fn is_admin(&self, user_id: UserId) -> bool {
        self.ids.contains(&user_id)
    }
}
