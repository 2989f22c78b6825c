mod chat_service;
mod user_service;


pub use chat_service::{
    ChatService, ChatServiceDependencies, HistoryRequest, MarkReadRequest,
    OpenConversationRequest, SendMessageRequest, TypingRequest,
};
pub use user_service::{
    AuthenticateUserRequest, RegisterUserRequest, SearchUsersRequest, UpdateProfileRequest,
    UserService, UserServiceDependencies,
};
