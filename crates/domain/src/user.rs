use crate::value_objects::{DisplayName, PasswordHash, Timestamp, UserId, Username};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: Username,
    pub display_name: DisplayName,
    pub bio: String,
    pub avatar_url: String,
    #[serde(skip_serializing)] // 密码字段不暴露给客户端
    pub password: PasswordHash,
    pub last_seen: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl User {
    pub fn register(
        id: UserId,
        username: Username,
        display_name: DisplayName,
        password: PasswordHash,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            username,
            display_name,
            bio: String::new(),
            avatar_url: String::new(),
            password,
            last_seen: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn update_profile(
        &mut self,
        display_name: Option<DisplayName>,
        bio: Option<String>,
        avatar_url: Option<String>,
        now: Timestamp,
    ) {
        if let Some(new_display_name) = display_name {
            self.display_name = new_display_name;
        }
        if let Some(new_bio) = bio {
            self.bio = new_bio;
        }
        if let Some(new_avatar_url) = avatar_url {
            self.avatar_url = new_avatar_url;
        }
        self.updated_at = now;
    }

    pub fn set_password(&mut self, password: PasswordHash, now: Timestamp) {
        self.password = password;
        self.updated_at = now;
    }

    pub fn touch_last_seen(&mut self, now: Timestamp) {
        self.last_seen = Some(now);
    }
}
