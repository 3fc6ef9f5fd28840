diesel::table! {
    companies (id) {
        id -> Uuid,
        company_name -> Varchar,
        company_code -> Varchar,
        primary_contact -> Varchar,
        phone -> Nullable<Varchar>,
        email -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    users (id) {
        id -> Uuid,
        first_name -> Varchar,
        last_name -> Varchar,
        email -> Varchar,
        login_code -> Nullable<Varchar>,
        password_hash -> Nullable<Varchar>,
        role -> Varchar,
        company_id -> Nullable<Uuid>,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    agents (id) {
        id -> Uuid,
        user_id -> Uuid,
        assigned_company_ids -> Array<Uuid>,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    service_requests (id) {
        id -> Uuid,
        service_queue_id -> Varchar,
        client -> Varchar,
        company_id -> Uuid,
        task_status -> Varchar,
        service_request_narrative -> Text,
        service_queue_category -> Varchar,
        assigned_to_id -> Nullable<Uuid>,
        assigned_by_id -> Uuid,
        due_date -> Nullable<Timestamptz>,
        modified_by_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    request_notes (id) {
        id -> Uuid,
        request_id -> Uuid,
        author_id -> Uuid,
        note_content -> Text,
        is_internal -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    request_attachments (id) {
        id -> Uuid,
        request_id -> Uuid,
        file_name -> Varchar,
        stored_name -> Varchar,
        file_path -> Varchar,
        file_size -> Int8,
        mime_type -> Varchar,
        uploaded_by_id -> Uuid,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    activity_logs (id) {
        id -> Uuid,
        activity_type -> Varchar,
        description -> Text,
        actor_id -> Nullable<Uuid>,
        company_id -> Nullable<Uuid>,
        request_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    notifications (id) {
        id -> Uuid,
        user_id -> Uuid,
        title -> Varchar,
        message -> Text,
        link -> Nullable<Varchar>,
        is_read -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(service_requests -> companies (company_id));
diesel::joinable!(users -> companies (company_id));
diesel::joinable!(agents -> users (user_id));
diesel::joinable!(request_notes -> service_requests (request_id));
diesel::joinable!(request_attachments -> service_requests (request_id));
diesel::joinable!(notifications -> users (user_id));

diesel::allow_tables_to_appear_in_same_query!(
    companies,
    users,
    agents,
    service_requests,
    request_notes,
    request_attachments,
    activity_logs,
    notifications,
);
