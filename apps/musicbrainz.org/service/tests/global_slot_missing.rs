use musicbrainz_web_service::catalyst::{catalyst_context, source_entity_data};

#[test]
#[should_panic(expected = "Catalyst context not found in __MB__")]
fn catalyst_context_panics_before_the_slot_is_installed() {
    let _ = catalyst_context();
}

#[test]
#[should_panic(expected = "Catalyst context not found in __MB__")]
fn source_entity_data_panics_before_the_slot_is_installed() {
    let _ = source_entity_data();
}
