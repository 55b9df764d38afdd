use async_trait::async_trait;

use bastion_auth::{AuthError, AuthService};
use bastion_core::ServiceError;

use crate::app::adapter::Handler;
use crate::app::dto::{Empty, ProfileResponse};
use crate::context::RequestContext;

/// `GET /api/profile` for the authenticated caller.
pub struct Profile {
    pub auth: AuthService,
}

#[async_trait]
impl Handler for Profile {
    type Request = Empty;
    type Response = ProfileResponse;

    async fn handle(&self, ctx: RequestContext, _req: Empty) -> anyhow::Result<ProfileResponse> {
        let user_id = ctx.require_identity()?.user_id;

        let user = self.auth.user(user_id).await.map_err(|e| match e {
            AuthError::UserNotFound => ServiceError::not_found("User not found"),
            other => ServiceError::internal(other),
        })?;

        Ok(user.into())
    }
}
