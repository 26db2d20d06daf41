//! Listings: a garment offered on the platform.
use crate::error::{MarketError, Result};
use crate::swap::SwapKind;
use crate::types::{
    Category, Condition, ListingId, SwapPreference, Style, TimeStamp, UserId, is_known_size,
};
use crate::validation;
use chrono::Utc;

labelled_enum!(
    ListingStatus, "status" {
        0 => Pending = "pending",
        1 => Approved = "approved",
        2 => Rejected = "rejected",
        3 => Available = "available",
        4 => Reserved = "reserved",
        5 => Swapped = "swapped",
        6 => Removed = "removed",
    }
);

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ListingImage {
    #[n(0)]
    pub url: String,
    #[n(1)]
    pub public_id: String,
    #[n(2)]
    pub is_primary: bool,
}

/// An image already stored by the upload collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    pub url: String,
    pub public_id: String,
}

impl UploadedImage {
    pub fn new(url: impl Into<String>, public_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            public_id: public_id.into(),
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    #[n(0)]
    pub id: ListingId,
    #[n(1)]
    pub title: String,
    #[n(2)]
    pub description: String,
    #[n(3)]
    pub category: Category,
    #[n(4)]
    pub style: Style,
    #[n(5)]
    pub size: String,
    #[n(6)]
    pub condition: Condition,
    #[n(7)]
    pub color: String,
    #[n(8)]
    pub brand: Option<String>,
    #[n(9)]
    pub material: Option<String>,
    #[n(10)]
    pub tags: Vec<String>,
    #[n(11)]
    pub location: Option<String>,
    #[n(12)]
    pub images: Vec<ListingImage>,
    #[n(13)]
    pub owner: UserId,
    #[n(14)]
    pub status: ListingStatus,
    #[n(15)]
    pub swap_type: SwapPreference,
    #[n(16)]
    pub points_value: u64,
    #[n(17)]
    pub is_featured: bool,
    #[n(18)]
    pub likes: Vec<UserId>,
    #[n(19)]
    pub admin_notes: Option<String>,
    #[n(20)]
    pub rejection_reason: Option<String>,
    #[n(21)]
    pub created_at: TimeStamp<Utc>,
    #[n(22)]
    pub updated_at: TimeStamp<Utc>,
}

// Used for constructing listings before moderation
#[derive(Debug, Default, Clone)]
pub struct ListingDraft {
    title: Option<String>,
    description: Option<String>,
    category: Option<Category>,
    style: Option<Style>,
    size: Option<String>,
    condition: Option<Condition>,
    color: Option<String>,
    brand: Option<String>,
    material: Option<String>,
    tags: Vec<String>,
    location: Option<String>,
    swap_type: Option<SwapPreference>,
    points_value: u64,
    images: Vec<UploadedImage>,
}

impl ListingDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_owned());
        self
    }
    pub fn set_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_owned());
        self
    }
    pub fn set_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }
    pub fn set_style(mut self, style: Style) -> Self {
        self.style = Some(style);
        self
    }
    pub fn set_size(mut self, size: &str) -> Self {
        self.size = Some(size.to_owned());
        self
    }
    pub fn set_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }
    pub fn set_color(mut self, color: &str) -> Self {
        self.color = Some(color.to_owned());
        self
    }
    pub fn set_brand(mut self, brand: &str) -> Self {
        self.brand = Some(brand.to_owned());
        self
    }
    pub fn set_material(mut self, material: &str) -> Self {
        self.material = Some(material.to_owned());
        self
    }
    pub fn set_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
    pub fn set_location(mut self, location: &str) -> Self {
        self.location = Some(location.to_owned());
        self
    }
    pub fn set_swap_type(mut self, swap_type: SwapPreference) -> Self {
        self.swap_type = Some(swap_type);
        self
    }
    pub fn set_points_value(mut self, points: u64) -> Self {
        self.points_value = points;
        self
    }
    pub fn add_image(mut self, image: UploadedImage) -> Self {
        self.images.push(image);
        self
    }

    /// Checks every field and produces a listing awaiting moderation.
    /// The first image becomes the primary one.
    pub fn validate_and_finalise(self, id: ListingId, owner: UserId, max_images: usize) -> Result<Listing> {
        let title = validation::required_text("title", "Title", self.title.as_deref().unwrap_or(""), 1, 100)?;
        let description = validation::required_text(
            "description",
            "Description",
            self.description.as_deref().unwrap_or(""),
            10,
            1000,
        )?;
        let category = self
            .category
            .ok_or_else(|| MarketError::validation("category", "Invalid category"))?;
        let style = self
            .style
            .ok_or_else(|| MarketError::validation("type", "Invalid type"))?;
        let size = check_size(self.size.as_deref().unwrap_or(""))?;
        let condition = self
            .condition
            .ok_or_else(|| MarketError::validation("condition", "Invalid condition"))?;
        let color = validation::required_text("color", "Color", self.color.as_deref().unwrap_or(""), 1, 30)?;
        let brand = validation::optional_text("brand", "Brand name", self.brand.as_deref(), 50)?;
        let material = validation::optional_text("material", "Material", self.material.as_deref(), 100)?;
        let location = validation::optional_text("location", "Location", self.location.as_deref(), 100)?;
        let tags = check_tags(self.tags)?;
        if self.images.len() > max_images {
            return Err(MarketError::validation(
                "images",
                format!("Maximum {max_images} images allowed"),
            ));
        }

        let now = TimeStamp::new();
        let mut listing = Listing {
            id,
            title,
            description,
            category,
            style,
            size,
            condition,
            color,
            brand,
            material,
            tags,
            location,
            images: Vec::new(),
            owner,
            status: ListingStatus::Pending,
            swap_type: self.swap_type.unwrap_or(SwapPreference::Both),
            points_value: self.points_value,
            is_featured: false,
            likes: Vec::new(),
            admin_notes: None,
            rejection_reason: None,
            created_at: now.clone(),
            updated_at: now,
        };
        listing.append_images(self.images, max_images)?;
        Ok(listing)
    }
}

/// Partial update sent by the owner. `None` leaves a field untouched.
#[derive(Debug, Default, Clone)]
pub struct ListingUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<Category>,
    pub style: Option<Style>,
    pub size: Option<String>,
    pub condition: Option<Condition>,
    pub color: Option<String>,
    pub brand: Option<String>,
    pub material: Option<String>,
    pub tags: Option<Vec<String>>,
    pub location: Option<String>,
    pub swap_type: Option<SwapPreference>,
    pub points_value: Option<u64>,
    pub new_images: Vec<UploadedImage>,
}

impl Listing {
    pub fn is_available(&self) -> bool {
        self.status == ListingStatus::Available
    }

    /// Whether a swap of `kind` may target (or offer) this listing.
    pub fn accepts(&self, kind: SwapKind) -> bool {
        matches!(
            (self.swap_type, kind),
            (SwapPreference::Both, _)
                | (SwapPreference::Direct, SwapKind::Direct)
                | (SwapPreference::Points, SwapKind::Points)
        )
    }

    /// URL of the primary image, falling back to the first one.
    pub fn primary_image(&self) -> Option<&str> {
        self.images
            .iter()
            .find(|img| img.is_primary)
            .or_else(|| self.images.first())
            .map(|img| img.url.as_str())
    }

    pub fn like_count(&self) -> usize {
        self.likes.len()
    }

    pub fn is_liked_by(&self, user: &UserId) -> bool {
        self.likes.contains(user)
    }

    /// Add or remove `user`'s like. Returns whether the user now likes the listing.
    pub fn toggle_like(&mut self, user: &UserId) -> bool {
        if let Some(pos) = self.likes.iter().position(|u| u == user) {
            self.likes.remove(pos);
            false
        } else {
            self.likes.push(user.clone());
            true
        }
    }

    /// Copy without the moderation fields that only admins may see.
    pub fn redacted(&self) -> Self {
        Self {
            admin_notes: None,
            rejection_reason: None,
            ..self.clone()
        }
    }

    /// What the owner sees: the rejection reason stays, admin notes do not.
    pub fn owner_view(&self) -> Self {
        Self {
            admin_notes: None,
            ..self.clone()
        }
    }

    pub fn matches_text(&self, query: &str) -> bool {
        let needles: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        if needles.is_empty() {
            return true;
        }
        let haystack = format!(
            "{} {} {}",
            self.title.to_lowercase(),
            self.description.to_lowercase(),
            self.tags.join(" ").to_lowercase()
        );
        needles.iter().any(|needle| haystack.contains(needle.as_str()))
    }

    pub fn apply_update(&mut self, update: ListingUpdate, max_images: usize) -> Result<()> {
        if let Some(title) = update.title {
            self.title = validation::required_text("title", "Title", &title, 1, 100)?;
        }
        if let Some(description) = update.description {
            self.description =
                validation::required_text("description", "Description", &description, 10, 1000)?;
        }
        if let Some(category) = update.category {
            self.category = category;
        }
        if let Some(style) = update.style {
            self.style = style;
        }
        if let Some(size) = update.size {
            self.size = check_size(&size)?;
        }
        if let Some(condition) = update.condition {
            self.condition = condition;
        }
        if let Some(color) = update.color {
            self.color = validation::required_text("color", "Color", &color, 1, 30)?;
        }
        if let Some(brand) = update.brand {
            self.brand = validation::optional_text("brand", "Brand name", Some(&brand), 50)?;
        }
        if let Some(material) = update.material {
            self.material = validation::optional_text("material", "Material", Some(&material), 100)?;
        }
        if let Some(tags) = update.tags {
            self.tags = check_tags(tags)?;
        }
        if let Some(location) = update.location {
            self.location = validation::optional_text("location", "Location", Some(&location), 100)?;
        }
        if let Some(swap_type) = update.swap_type {
            self.swap_type = swap_type;
        }
        if let Some(points) = update.points_value {
            self.points_value = points;
        }
        self.append_images(update.new_images, max_images)?;
        self.touch();
        Ok(())
    }

    /// Append uploaded images; the first one becomes primary only when the
    /// listing had no images before.
    pub fn append_images(&mut self, uploads: Vec<UploadedImage>, max_images: usize) -> Result<()> {
        if self.images.len() + uploads.len() > max_images {
            return Err(MarketError::validation(
                "images",
                format!("Maximum {max_images} images allowed"),
            ));
        }
        let had_images = !self.images.is_empty();
        for (index, upload) in uploads.into_iter().enumerate() {
            self.images.push(ListingImage {
                url: upload.url,
                public_id: upload.public_id,
                is_primary: index == 0 && !had_images,
            });
        }
        Ok(())
    }

    /// Drop an image; if it was the primary one the first remaining image is promoted.
    pub fn remove_image(&mut self, public_id: &str) -> Result<ListingImage> {
        let pos = self
            .images
            .iter()
            .position(|img| img.public_id == public_id)
            .ok_or_else(|| MarketError::not_found("Image", public_id))?;
        let removed = self.images.remove(pos);
        if !self.images.iter().any(|img| img.is_primary) {
            if let Some(first) = self.images.first_mut() {
                first.is_primary = true;
            }
        }
        self.touch();
        Ok(removed)
    }

    pub fn set_primary_image(&mut self, public_id: &str) -> Result<()> {
        if !self.images.iter().any(|img| img.public_id == public_id) {
            return Err(MarketError::not_found("Image", public_id));
        }
        for img in &mut self.images {
            img.is_primary = img.public_id == public_id;
        }
        self.touch();
        Ok(())
    }

    // moderation

    pub fn approve(&mut self, notes: Option<String>) -> Result<()> {
        self.require_pending("approve")?;
        self.status = ListingStatus::Available;
        if let Some(notes) = validation::optional_text("adminNotes", "Admin notes", notes.as_deref(), 500)? {
            self.admin_notes = Some(notes);
        }
        self.touch();
        Ok(())
    }

    pub fn reject(&mut self, reason: &str, notes: Option<String>) -> Result<()> {
        let reason = validation::optional_text("rejectionReason", "Rejection reason", Some(reason), 200)?
            .ok_or_else(|| MarketError::validation("rejectionReason", "Rejection reason is required"))?;
        self.require_pending("reject")?;
        self.status = ListingStatus::Rejected;
        self.rejection_reason = Some(reason);
        if let Some(notes) = validation::optional_text("adminNotes", "Admin notes", notes.as_deref(), 500)? {
            self.admin_notes = Some(notes);
        }
        self.touch();
        Ok(())
    }

    /// Flip the featured flag. Returns the new value.
    pub fn toggle_featured(&mut self) -> Result<bool> {
        if !self.is_available() {
            return Err(MarketError::rule("Can only feature available items"));
        }
        self.is_featured = !self.is_featured;
        self.touch();
        Ok(self.is_featured)
    }

    /// Soft delete. The listing stays in the store for the swap audit trail.
    pub fn remove(&mut self, reason: Option<String>) -> Result<()> {
        if let Some(reason) = validation::optional_text("reason", "Reason", reason.as_deref(), 500)? {
            self.admin_notes = Some(reason);
        }
        self.status = ListingStatus::Removed;
        self.touch();
        Ok(())
    }

    // swap side effects

    pub(crate) fn reserve(&mut self) {
        self.status = ListingStatus::Reserved;
        self.touch();
    }

    pub(crate) fn release(&mut self) {
        self.status = ListingStatus::Available;
        self.touch();
    }

    pub(crate) fn hand_over(&mut self, new_owner: &UserId) {
        self.owner = new_owner.clone();
        self.status = ListingStatus::Swapped;
        self.touch();
    }

    fn require_pending(&self, action: &str) -> Result<()> {
        if self.status != ListingStatus::Pending {
            return Err(MarketError::rule(format!("Can only {action} pending items")));
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = TimeStamp::new();
    }
}

fn check_size(size: &str) -> Result<String> {
    if !is_known_size(size) {
        return Err(MarketError::validation("size", "Invalid size"));
    }
    Ok(size.to_owned())
}

fn check_tags(tags: Vec<String>) -> Result<Vec<String>> {
    if tags.len() > 10 {
        return Err(MarketError::validation("tags", "Maximum 10 tags allowed"));
    }
    tags.iter()
        .map(|tag| validation::required_text("tags", "Each tag", tag, 1, 20))
        .collect()
}
