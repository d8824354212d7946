//! User lifecycle commands.

use crate::auth::password;
use crate::auth::totp;
use crate::command::{require, require_email, CommandContext, Commands, ObjectDetails};
use crate::error::{Error, Result};
use crate::event::{
    EventPayload, HumanEmailChanged, HumanOtpAdded, HumanOtpVerified, HumanPasswordChanged,
    HumanPhoneChanged, HumanPhoneRemoved, HumanProfileChanged, HumanUserAdded, MachineKeyAdded,
    MachineKeyRemoved, StoreEvent, UserDeactivated, UserLocked, UserReactivated, UserRemoved,
    UserUnlocked, UsernameChanged,
};
use crate::store::EventFilter;
use crate::types::{AggregateKind, UserState};

/// Input of [`Commands::add_human_user`].
#[derive(Debug, Clone, Default)]
pub struct AddHumanUser {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub display_name: Option<String>,
    pub email: String,
    pub phone: Option<String>,
    pub password: Option<String>,
    pub preferred_language: Option<String>,
}

/// Input of [`Commands::change_profile`]; `None` fields stay unchanged.
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub display_name: Option<String>,
    pub preferred_language: Option<String>,
}

/// Current user state folded from its event history.
#[derive(Debug, Clone)]
pub(crate) struct UserWriteModel {
    pub version: i64,
    pub state: UserState,
    pub username: String,
    pub phone: Option<String>,
    pub otp_secret: Option<String>,
    pub otp_verified: bool,
    pub machine_key_ids: Vec<String>,
}

impl UserWriteModel {
    pub(crate) fn fold(events: &[StoreEvent]) -> Self {
        let mut model = Self {
            version: 0,
            state: UserState::Initial,
            username: String::new(),
            phone: None,
            otp_secret: None,
            otp_verified: false,
            machine_key_ids: Vec::new(),
        };
        for event in events {
            model.version = event.aggregate_version;
            match &event.payload {
                EventPayload::HumanUserAdded(added) => {
                    model.state = UserState::Active;
                    model.username = added.username.clone();
                    model.phone = added.phone.clone();
                }
                EventPayload::UsernameChanged(changed) => model.username = changed.username.clone(),
                EventPayload::HumanPhoneChanged(changed) => model.phone = Some(changed.phone.clone()),
                EventPayload::HumanPhoneRemoved(_) => model.phone = None,
                EventPayload::HumanOtpAdded(added) => {
                    model.otp_secret = Some(added.secret.clone());
                    model.otp_verified = false;
                }
                EventPayload::HumanOtpVerified(_) => model.otp_verified = true,
                EventPayload::HumanOtpRemoved(_) => {
                    model.otp_secret = None;
                    model.otp_verified = false;
                }
                EventPayload::UserDeactivated(_) => model.state = UserState::Inactive,
                EventPayload::UserReactivated(_) | EventPayload::UserUnlocked(_) => {
                    model.state = UserState::Active
                }
                EventPayload::UserLocked(_) => model.state = UserState::Locked,
                EventPayload::UserRemoved(_) => model.state = UserState::Removed,
                EventPayload::MachineKeyAdded(added) => {
                    model.machine_key_ids.push(added.key_id.clone())
                }
                EventPayload::MachineKeyRemoved(removed) => {
                    model.machine_key_ids.retain(|id| id != &removed.key_id)
                }
                _ => {}
            }
        }
        model
    }
}

impl Commands {
    async fn load_user(&self, ctx: &CommandContext, user_id: &str) -> Result<UserWriteModel> {
        let history = self
            .require_history(ctx, AggregateKind::User, user_id)
            .await?;
        let model = UserWriteModel::fold(&history.events);
        if model.state == UserState::Removed {
            return Err(Error::NotFound(format!("user {user_id}")));
        }
        Ok(model)
    }

    /// Whether `username` is currently claimed in the instance, folded
    /// from the log so commands stay ahead of projection lag.
    async fn username_taken(&self, ctx: &CommandContext, username: &str) -> Result<bool> {
        let filter = EventFilter::new()
            .instance(ctx.instance_id.clone())
            .aggregate_type(AggregateKind::User)
            .event_type("user.human.added")
            .event_type("user.username.changed")
            .event_type("user.removed");

        let mut current: std::collections::HashMap<String, String> =
            std::collections::HashMap::new();
        for event in self.store().events(&filter).await? {
            match &event.payload {
                EventPayload::HumanUserAdded(added) => {
                    current.insert(event.aggregate_id.clone(), added.username.clone());
                }
                EventPayload::UsernameChanged(changed) => {
                    current.insert(event.aggregate_id.clone(), changed.username.clone());
                }
                EventPayload::UserRemoved(_) => {
                    current.remove(&event.aggregate_id);
                }
                _ => {}
            }
        }
        Ok(current.values().any(|taken| taken == username))
    }

    /// Creates a human user, returning its id alongside the details.
    pub async fn add_human_user(
        &self,
        ctx: &CommandContext,
        input: AddHumanUser,
    ) -> Result<(String, ObjectDetails)> {
        ctx.require_instance()?;
        require(&input.username, "username")?;
        require(&input.first_name, "first_name")?;
        require(&input.last_name, "last_name")?;
        require_email(&input.email)?;

        let password_hash = match &input.password {
            Some(clear) => {
                password::validate_password(clear, self.password_policy())?;
                Some(password::hash_password(clear)?)
            }
            None => None,
        };

        if self.username_taken(ctx, &input.username).await? {
            return Err(Error::validation("username", "already taken"));
        }

        let user_id = self.next_id();
        let events = self
            .store()
            .push_with_concurrency_check(
                vec![self.command(
                    ctx,
                    &user_id,
                    &ctx.resource_owner(),
                    EventPayload::HumanUserAdded(HumanUserAdded {
                        username: input.username,
                        first_name: input.first_name,
                        last_name: input.last_name,
                        display_name: input.display_name,
                        email: input.email,
                        phone: input.phone,
                        password_hash,
                        preferred_language: input.preferred_language,
                    }),
                )],
                0,
            )
            .await?;

        Ok((user_id, ObjectDetails::from_events(&events)))
    }

    pub async fn change_profile(
        &self,
        ctx: &CommandContext,
        user_id: &str,
        changes: ProfileChanges,
    ) -> Result<ObjectDetails> {
        if changes.first_name.is_none()
            && changes.last_name.is_none()
            && changes.display_name.is_none()
            && changes.preferred_language.is_none()
        {
            return Err(Error::validation("profile", "nothing to change"));
        }
        let model = self.load_user(ctx, user_id).await?;

        let events = self
            .store()
            .push_with_concurrency_check(
                vec![self.command(
                    ctx,
                    user_id,
                    &ctx.resource_owner(),
                    EventPayload::HumanProfileChanged(HumanProfileChanged {
                        first_name: changes.first_name,
                        last_name: changes.last_name,
                        display_name: changes.display_name,
                        preferred_language: changes.preferred_language,
                    }),
                )],
                model.version,
            )
            .await?;
        Ok(ObjectDetails::from_events(&events))
    }

    pub async fn change_email(
        &self,
        ctx: &CommandContext,
        user_id: &str,
        email: &str,
    ) -> Result<ObjectDetails> {
        require_email(email)?;
        let model = self.load_user(ctx, user_id).await?;

        let events = self
            .store()
            .push_with_concurrency_check(
                vec![self.command(
                    ctx,
                    user_id,
                    &ctx.resource_owner(),
                    EventPayload::HumanEmailChanged(HumanEmailChanged {
                        email: email.to_owned(),
                        is_verified: false,
                    }),
                )],
                model.version,
            )
            .await?;
        Ok(ObjectDetails::from_events(&events))
    }

    pub async fn change_username(
        &self,
        ctx: &CommandContext,
        user_id: &str,
        username: &str,
    ) -> Result<ObjectDetails> {
        require(username, "username")?;
        let model = self.load_user(ctx, user_id).await?;
        if model.username == username {
            return Err(Error::validation("username", "unchanged"));
        }
        if self.username_taken(ctx, username).await? {
            return Err(Error::validation("username", "already taken"));
        }

        let events = self
            .store()
            .push_with_concurrency_check(
                vec![self.command(
                    ctx,
                    user_id,
                    &ctx.resource_owner(),
                    EventPayload::UsernameChanged(UsernameChanged {
                        username: username.to_owned(),
                    }),
                )],
                model.version,
            )
            .await?;
        Ok(ObjectDetails::from_events(&events))
    }

    pub async fn change_user_phone(
        &self,
        ctx: &CommandContext,
        user_id: &str,
        phone: &str,
    ) -> Result<ObjectDetails> {
        require(phone, "phone")?;
        let model = self.load_user(ctx, user_id).await?;

        let events = self
            .store()
            .push_with_concurrency_check(
                vec![self.command(
                    ctx,
                    user_id,
                    &ctx.resource_owner(),
                    EventPayload::HumanPhoneChanged(HumanPhoneChanged {
                        phone: phone.to_owned(),
                    }),
                )],
                model.version,
            )
            .await?;
        Ok(ObjectDetails::from_events(&events))
    }

    pub async fn remove_user_phone(
        &self,
        ctx: &CommandContext,
        user_id: &str,
    ) -> Result<ObjectDetails> {
        let model = self.load_user(ctx, user_id).await?;
        if model.phone.is_none() {
            return Err(Error::NotFound(format!("phone of user {user_id}")));
        }

        let events = self
            .store()
            .push_with_concurrency_check(
                vec![self.command(
                    ctx,
                    user_id,
                    &ctx.resource_owner(),
                    EventPayload::HumanPhoneRemoved(HumanPhoneRemoved {}),
                )],
                model.version,
            )
            .await?;
        Ok(ObjectDetails::from_events(&events))
    }

    pub async fn change_password(
        &self,
        ctx: &CommandContext,
        user_id: &str,
        new_password: &str,
    ) -> Result<ObjectDetails> {
        password::validate_password(new_password, self.password_policy())?;
        let model = self.load_user(ctx, user_id).await?;
        let password_hash = password::hash_password(new_password)?;

        let events = self
            .store()
            .push_with_concurrency_check(
                vec![self.command(
                    ctx,
                    user_id,
                    &ctx.resource_owner(),
                    EventPayload::HumanPasswordChanged(HumanPasswordChanged { password_hash }),
                )],
                model.version,
            )
            .await?;
        Ok(ObjectDetails::from_events(&events))
    }

    pub async fn deactivate_user(&self, ctx: &CommandContext, user_id: &str) -> Result<ObjectDetails> {
        let model = self.load_user(ctx, user_id).await?;
        if model.state != UserState::Active {
            return Err(Error::validation("state", "only active users can be deactivated"));
        }
        self.user_transition(ctx, user_id, model.version, EventPayload::UserDeactivated(UserDeactivated {}))
            .await
    }

    pub async fn reactivate_user(&self, ctx: &CommandContext, user_id: &str) -> Result<ObjectDetails> {
        let model = self.load_user(ctx, user_id).await?;
        if model.state != UserState::Inactive {
            return Err(Error::validation("state", "only inactive users can be reactivated"));
        }
        self.user_transition(ctx, user_id, model.version, EventPayload::UserReactivated(UserReactivated {}))
            .await
    }

    pub async fn lock_user(&self, ctx: &CommandContext, user_id: &str) -> Result<ObjectDetails> {
        let model = self.load_user(ctx, user_id).await?;
        if model.state == UserState::Locked {
            return Err(Error::validation("state", "user is already locked"));
        }
        self.user_transition(ctx, user_id, model.version, EventPayload::UserLocked(UserLocked {}))
            .await
    }

    pub async fn unlock_user(&self, ctx: &CommandContext, user_id: &str) -> Result<ObjectDetails> {
        let model = self.load_user(ctx, user_id).await?;
        if model.state != UserState::Locked {
            return Err(Error::validation("state", "user is not locked"));
        }
        self.user_transition(ctx, user_id, model.version, EventPayload::UserUnlocked(UserUnlocked {}))
            .await
    }

    pub async fn remove_user(&self, ctx: &CommandContext, user_id: &str) -> Result<ObjectDetails> {
        let model = self.load_user(ctx, user_id).await?;
        self.user_transition(ctx, user_id, model.version, EventPayload::UserRemoved(UserRemoved {}))
            .await
    }

    async fn user_transition(
        &self,
        ctx: &CommandContext,
        user_id: &str,
        version: i64,
        payload: EventPayload,
    ) -> Result<ObjectDetails> {
        let events = self
            .store()
            .push_with_concurrency_check(
                vec![self.command(ctx, user_id, &ctx.resource_owner(), payload)],
                version,
            )
            .await?;
        Ok(ObjectDetails::from_events(&events))
    }

    /// Registers a public key on a machine user; the key id is generated.
    pub async fn add_machine_key(
        &self,
        ctx: &CommandContext,
        user_id: &str,
        key_type: &str,
        public_key: &str,
        expiration_date: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<(String, ObjectDetails)> {
        require(key_type, "key_type")?;
        require(public_key, "public_key")?;
        let model = self.load_user(ctx, user_id).await?;

        let key_id = self.next_id();
        let events = self
            .store()
            .push_with_concurrency_check(
                vec![self.command(
                    ctx,
                    user_id,
                    &ctx.resource_owner(),
                    EventPayload::MachineKeyAdded(MachineKeyAdded {
                        key_id: key_id.clone(),
                        key_type: key_type.to_owned(),
                        public_key: public_key.to_owned(),
                        expiration_date,
                    }),
                )],
                model.version,
            )
            .await?;
        Ok((key_id, ObjectDetails::from_events(&events)))
    }

    pub async fn remove_machine_key(
        &self,
        ctx: &CommandContext,
        user_id: &str,
        key_id: &str,
    ) -> Result<ObjectDetails> {
        let model = self.load_user(ctx, user_id).await?;
        if !model.machine_key_ids.iter().any(|id| id == key_id) {
            return Err(Error::NotFound(format!("machine key {key_id}")));
        }

        let events = self
            .store()
            .push_with_concurrency_check(
                vec![self.command(
                    ctx,
                    user_id,
                    &ctx.resource_owner(),
                    EventPayload::MachineKeyRemoved(MachineKeyRemoved {
                        key_id: key_id.to_owned(),
                    }),
                )],
                model.version,
            )
            .await?;
        Ok(ObjectDetails::from_events(&events))
    }

    /// Enrolls TOTP: generates a secret, records it unverified, and
    /// returns the secret for the enrollment QR exactly once.
    pub async fn add_totp(&self, ctx: &CommandContext, user_id: &str) -> Result<(String, ObjectDetails)> {
        let model = self.load_user(ctx, user_id).await?;
        if model.otp_verified {
            return Err(Error::validation("otp", "TOTP is already configured"));
        }

        let secret = totp::generate_secret();
        let events = self
            .store()
            .push_with_concurrency_check(
                vec![self.command(
                    ctx,
                    user_id,
                    &ctx.resource_owner(),
                    EventPayload::HumanOtpAdded(HumanOtpAdded {
                        secret: secret.clone(),
                    }),
                )],
                model.version,
            )
            .await?;
        Ok((secret, ObjectDetails::from_events(&events)))
    }

    /// Confirms TOTP enrollment with a code from the authenticator.
    pub async fn verify_totp(
        &self,
        ctx: &CommandContext,
        user_id: &str,
        code: &str,
    ) -> Result<ObjectDetails> {
        let model = self.load_user(ctx, user_id).await?;
        let secret = model
            .otp_secret
            .as_deref()
            .ok_or_else(|| Error::NotFound(format!("TOTP enrollment of user {user_id}")))?;
        if model.otp_verified {
            return Err(Error::validation("otp", "TOTP is already verified"));
        }
        if !totp::verify_code(secret, code)? {
            return Err(Error::InvalidCredentials);
        }

        let events = self
            .store()
            .push_with_concurrency_check(
                vec![self.command(
                    ctx,
                    user_id,
                    &ctx.resource_owner(),
                    EventPayload::HumanOtpVerified(HumanOtpVerified {}),
                )],
                model.version,
            )
            .await?;
        Ok(ObjectDetails::from_events(&events))
    }
}
