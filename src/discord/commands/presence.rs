// Bot presence - Discord-layer glue only.

use poise::serenity_prelude as serenity;

/// Point members at the command they are most likely to want.
pub fn reset_status(ctx: &serenity::Context) {
    let activity = serenity::ActivityData::playing("/daily for points");
    ctx.set_presence(Some(activity), serenity::OnlineStatus::Online);
}

/// Called once the bot is ready so the default presence is set in one place.
pub fn on_ready(ctx: &serenity::Context) {
    reset_status(ctx);
}
