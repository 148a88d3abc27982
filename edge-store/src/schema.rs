//! diesel table definitions for the local SQLite store (spec.md §4.5).

diesel::table! {
    tenant (id) {
        id -> Text,
        display_name -> Text,
        api_key -> Text,
        last_seen -> Nullable<Text>,
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
        last_reading_at -> Nullable<Text>,
    }
}

diesel::table! {
    meter_reading (id) {
        id -> Text,
        meter_id -> Text,
        ts -> Text,
        field_name -> Text,
        value -> Double,
        unit -> Text,
        quality -> Text,
        synchronized -> Bool,
        retry_count -> Integer,
        quarantined -> Bool,
        created_at -> Text,
    }
}

diesel::table! {
    sync_log (id) {
        id -> Text,
        operation -> Text,
        batch_size -> BigInt,
        success -> Bool,
        error_message -> Nullable<Text>,
        ts -> Text,
    }
}
