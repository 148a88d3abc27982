//! Table defs for the remote tenant/meter/register/device_register
//! tables (spec.md §6: "the local store mirrors the row shape"). Pull is
//! read-only: no `insert_into`/`update` statements target these tables
//! anywhere in this crate.

diesel::table! {
    tenant (id) {
        id -> Text,
        display_name -> Text,
        api_key -> Text,
        last_seen -> Nullable<Timestamp>,
    }
}

diesel::table! {
    register (id) {
        id -> Text,
        device_id -> Text,
        name -> Text,
        base_number -> BigInt,
        unit -> Text,
        field_name -> Text,
    }
}

diesel::table! {
    device_register (id) {
        id -> Text,
        device_id -> Text,
        register_id -> Text,
    }
}

diesel::table! {
    meter (id) {
        id -> Text,
        display_name -> Text,
        ip -> Text,
        port -> Integer,
        protocol -> Text,
        device_id -> Text,
        element_tag -> Text,
        active -> Bool,
        register_map -> Nullable<Text>,
    }
}
