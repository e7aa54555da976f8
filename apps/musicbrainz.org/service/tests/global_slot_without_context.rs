use musicbrainz_web_service::catalyst::{
    GlobalNamespace, catalyst_context, install_global_namespace,
};

#[test]
#[should_panic(expected = "Catalyst context not found in __MB__")]
fn catalyst_context_panics_when_the_slot_lacks_dollar_c() {
    let namespace = GlobalNamespace::from_globals_script(r#"window["__MB__"]={};"#)
        .expect("empty namespace parses");
    install_global_namespace(namespace).expect("first install succeeds");
    let _ = catalyst_context();
}
