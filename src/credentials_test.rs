use super::*;

#[test]
fn static_token_treats_empty_as_absent() {
    assert_eq!(StaticToken::new(Some(String::new())).token(), None);
    assert!(!StaticToken::default().should_authenticate());

    let token = StaticToken::new(Some("abc".into()));
    assert_eq!(token.token().as_deref(), Some("abc"));
    assert!(token.should_authenticate());
}

#[test]
fn shared_token_updates_are_visible_to_clones() {
    let token = SharedToken::new();
    let observer = token.clone();
    assert_eq!(observer.token(), None);

    token.set("abc".into(), false);
    assert_eq!(observer.token().as_deref(), Some("abc"));
    assert!(!observer.should_authenticate(), "read-only users do not authenticate");

    token.set("def".into(), true);
    assert!(observer.should_authenticate());

    token.clear();
    assert_eq!(observer.token(), None);
    assert!(!observer.should_authenticate());
}
