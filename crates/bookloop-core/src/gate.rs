use uuid::Uuid;

use bookloop_db::Store;

use crate::error::CoreResult;

/// Whether `a` and `b` may hold a private conversation about `book_id`.
///
/// True iff some exchange for that book links the two users, in either
/// direction and whatever its outcome. Always read from the store, never cached.
pub fn may_converse(store: &dyn Store, a: Uuid, b: Uuid, book_id: Uuid) -> CoreResult<bool> {
    if a == b {
        return Ok(false);
    }
    Ok(store.exchange_links(a, b, book_id)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    #[test]
    fn symmetric_and_status_independent() {
        let fx = Fixture::new();
        let owner = fx.user("Owner");
        let requester = fx.user("Requester");
        let stranger = fx.user("Stranger");
        let book = fx.book(owner);

        assert!(!may_converse(fx.store(), owner, requester, book).unwrap());

        let (exchange, _) = fx.core.ledger.create_exchange(book, requester, "hi").unwrap();
        assert!(may_converse(fx.store(), owner, requester, book).unwrap());
        assert!(may_converse(fx.store(), requester, owner, book).unwrap());

        fx.core.ledger.decline(exchange.id, owner).unwrap();
        assert!(may_converse(fx.store(), requester, owner, book).unwrap());

        assert!(!may_converse(fx.store(), stranger, owner, book).unwrap());
        assert!(!may_converse(fx.store(), owner, stranger, book).unwrap());
        assert!(!may_converse(fx.store(), owner, owner, book).unwrap());
    }

    #[test]
    fn scoped_to_the_book() {
        let fx = Fixture::new();
        let owner = fx.user("Owner");
        let requester = fx.user("Requester");
        let book = fx.book(owner);
        let other_book = fx.book(owner);

        fx.core.ledger.create_exchange(book, requester, "").unwrap();
        assert!(!may_converse(fx.store(), requester, owner, other_book).unwrap());
    }
}
