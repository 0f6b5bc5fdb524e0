use crate::auth::repo::Principal;
use crate::posts::repo::Post;

/// Ownership check for post mutation: only the authenticated owner may
/// update or delete. Anonymous callers never qualify.
pub fn can_mutate(post: &Post, principal: Option<&Principal>) -> bool {
    principal.map_or(false, |p| p.user_id == post.user_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn post(owner: i64) -> Post {
        Post {
            id: 1,
            title: "Hi".into(),
            content: "first post".into(),
            created_at: OffsetDateTime::now_utc(),
            user_id: owner,
        }
    }

    #[test]
    fn owner_may_mutate() {
        let alice = Principal::new(1);
        assert!(can_mutate(&post(1), Some(&alice)));
    }

    #[test]
    fn other_user_may_not_mutate() {
        let bob = Principal::new(2);
        assert!(!can_mutate(&post(1), Some(&bob)));
    }

    #[test]
    fn anonymous_may_not_mutate() {
        assert!(!can_mutate(&post(1), None));
    }

    #[test]
    fn roles_do_not_override_ownership() {
        let admin = Principal::with_roles(2, vec!["admin".to_string()]);
        assert!(!can_mutate(&post(1), Some(&admin)));
    }
}
