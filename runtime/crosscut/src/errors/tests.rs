use super::*;
use pretty_assertions::assert_eq;

#[test]
fn unknown_name_message_names_function_and_local() {
    let err = CrosscutError::unknown_name("wsgi_app", "reqest");
    assert_eq!(
        err.to_string(),
        "`wsgi_app` has no local variable or argument 'reqest'"
    );
}

#[test]
fn duplicate_export_message_names_receiver_and_both_names() {
    let err = CrosscutError::DuplicateExport {
        receiver: "current_request".to_owned(),
        function: "wsgi_app".to_owned(),
        existing: "request".to_owned(),
        name: "environ".to_owned(),
    };
    let msg = err.to_string();
    assert!(msg.starts_with("current_request is already exported by 'request'"));
    assert!(msg.ends_with("cannot also export it as 'environ'"));
}

#[test]
fn contract_message_reports_arity() {
    let err = CrosscutError::Contract {
        function: "current_user".to_owned(),
        arity: 2,
    };
    assert_eq!(
        err.to_string(),
        "receivers can't take arguments: `current_user` declares 2 parameter(s)"
    );
}

#[test]
fn conflicting_export_message_names_both_receivers() {
    let err = CrosscutError::ConflictingExport {
        function: "app".to_owned(),
        name: "x".to_owned(),
        existing: "count".to_owned(),
        expected: "i32",
        receiver: "label".to_owned(),
        found: "alloc::string::String",
    };
    assert_eq!(
        err.to_string(),
        "'x' in `app` is already exported to count as `i32`; label expects `alloc::string::String`"
    );
}
