use std::sync::Arc;

use domain::{DisplayName, DomainError, User, UserId, Username};
use uuid::Uuid;

use crate::{
    clock::Clock, dto::UserDto, error::ApplicationError, password::PasswordHasher,
    repository::UserRepository,
};

#[derive(Debug, Clone)]
pub struct RegisterUserRequest {
    pub username: String,
    pub display_name: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct AuthenticateUserRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct UpdateProfileRequest {
    pub user_id: Uuid,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SearchUsersRequest {
    pub requester: Uuid,
    pub query: String,
}

/// 搜索词少于这个长度时不查库，直接返回空列表。
const MIN_SEARCH_LEN: usize = 2;
const SEARCH_LIMIT: u32 = 20;

pub struct UserServiceDependencies {
    pub user_repository: Arc<dyn UserRepository>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub clock: Arc<dyn Clock>,
}

/// 账号与资料用例。
pub struct UserService {
    deps: UserServiceDependencies,
}

impl UserService {
    pub fn new(deps: UserServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn register(
        &self,
        request: RegisterUserRequest,
    ) -> Result<UserDto, ApplicationError> {
        let username = Username::parse(request.username)?;
        let display_name = DisplayName::parse(request.display_name)?;

        if self
            .deps
            .user_repository
            .find_by_username(username.clone())
            .await?
            .is_some()
        {
            return Err(ApplicationError::Domain(DomainError::UserAlreadyExists));
        }

        let password_hash = self.deps.password_hasher.hash(&request.password).await?;
        let now = self.deps.clock.now();
        let user = User::register(
            UserId::from(Uuid::new_v4()),
            username,
            display_name,
            password_hash,
            now,
        );

        let stored = self.deps.user_repository.create(user).await?;
        Ok(UserDto::from(&stored))
    }

    /// 校验用户名和密码。无论是用户不存在还是密码错误，
    /// 返回的都是同一个错误，不向调用方泄露账号是否存在。
    pub async fn authenticate(
        &self,
        request: AuthenticateUserRequest,
    ) -> Result<UserDto, ApplicationError> {
        let username =
            Username::parse(request.username).map_err(|_| ApplicationError::Authentication)?;
        let user = self
            .deps
            .user_repository
            .find_by_username(username)
            .await?
            .ok_or(ApplicationError::Authentication)?;

        let password_ok = self
            .deps
            .password_hasher
            .verify(&request.password, &user.password)
            .await?;
        if !password_ok {
            return Err(ApplicationError::Authentication);
        }

        Ok(UserDto::from(&user))
    }

    pub async fn get_profile(&self, user_id: Uuid) -> Result<UserDto, ApplicationError> {
        let user = self
            .deps
            .user_repository
            .find_by_id(UserId::from(user_id))
            .await?
            .ok_or(ApplicationError::Domain(DomainError::UserNotFound))?;
        Ok(UserDto::from(&user))
    }

    pub async fn update_profile(
        &self,
        request: UpdateProfileRequest,
    ) -> Result<UserDto, ApplicationError> {
        let display_name = match request.display_name {
            Some(value) => Some(DisplayName::parse(value)?),
            None => None,
        };

        let mut user = self
            .deps
            .user_repository
            .find_by_id(UserId::from(request.user_id))
            .await?
            .ok_or(ApplicationError::Domain(DomainError::UserNotFound))?;

        user.update_profile(
            display_name,
            request.bio,
            request.avatar_url,
            self.deps.clock.now(),
        );

        let stored = self.deps.user_repository.update(user).await?;
        Ok(UserDto::from(&stored))
    }

    pub async fn search(
        &self,
        request: SearchUsersRequest,
    ) -> Result<Vec<UserDto>, ApplicationError> {
        let query = request.query.trim();
        if query.chars().count() < MIN_SEARCH_LEN {
            return Ok(Vec::new());
        }

        let users = self
            .deps
            .user_repository
            .search(query, UserId::from(request.requester), SEARCH_LIMIT)
            .await?;
        Ok(users.iter().map(UserDto::from).collect())
    }

    /// 登出时更新最后在线时间，供对方展示离线时刻。
    pub async fn record_logout(&self, user_id: Uuid) -> Result<(), ApplicationError> {
        self.deps
            .user_repository
            .touch_last_seen(UserId::from(user_id), self.deps.clock.now())
            .await?;
        Ok(())
    }
}
