//! Declaration handles returned to callers.
//!
//! Both undeclare on drop. After the session closes they are inert.

use crate::session::SessionInner;
use shared_bus::HandlerId;
use shared_types::KeyExpr;
use std::sync::Weak;

/// A live subscription.
#[derive(Debug)]
pub struct Subscriber {
    pub(crate) id: HandlerId,
    pub(crate) key_expr: KeyExpr,
    pub(crate) session: Weak<SessionInner>,
}

impl Subscriber {
    /// Key expression subscribed to.
    #[must_use]
    pub fn key_expr(&self) -> &KeyExpr {
        &self.key_expr
    }

    /// Remove the subscription now.
    pub fn undeclare(self) {
        // Drop does the work.
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        if let Some(session) = self.session.upgrade() {
            session.undeclare_subscriber(self.id);
        }
    }
}

/// A live queryable.
#[derive(Debug)]
pub struct Queryable {
    pub(crate) id: HandlerId,
    pub(crate) key_expr: KeyExpr,
    pub(crate) session: Weak<SessionInner>,
}

impl Queryable {
    /// Key expression answered.
    #[must_use]
    pub fn key_expr(&self) -> &KeyExpr {
        &self.key_expr
    }

    /// Remove the queryable now.
    pub fn undeclare(self) {}
}

impl Drop for Queryable {
    fn drop(&mut self) {
        if let Some(session) = self.session.upgrade() {
            session.undeclare_queryable(self.id);
        }
    }
}
