table! {
    video (id) {
        id -> Uuid,
        owner_id -> Uuid,
        title -> Varchar,
        description -> Nullable<Text>,
        thumbnail_url -> Nullable<Text>,
        video_url -> Nullable<Text>,
        creation_timestamp -> Timestamptz,
        update_timestamp -> Timestamptz,
    }
}
