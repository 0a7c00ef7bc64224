use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Public profile of a marketplace user, as shown next to a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct UserProfile {
    /// Unique identifier for the user.
    pub id: Uuid,

    /// Display name.
    pub name: String,

    /// Email address.
    pub email: String,

    /// Avatar URL, if the user uploaded one.
    pub image_url: Option<String>,
}

/// The part of a listing the chat layer needs: who owns it and what it is called.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ListingRef {
    /// Listing identifier.
    pub id: Uuid,

    /// Seller who published the listing.
    pub owner_id: Uuid,

    /// Listing title, quoted in the welcome message.
    pub title: String,
}
