diesel::table! {
    tasks (task_id) {
        task_id -> Text,
        status -> Text,
        payload -> Text,
        created_at -> Text,
        updated_at -> Text,
    }
}
