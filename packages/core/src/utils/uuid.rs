// Идентификаторы сообщений и сессий

pub fn generate_v4() -> String {
    uuid::Uuid::new_v4().to_string()
}
