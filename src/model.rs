use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PostKind {
    #[default]
    Restaurant,
    Activity,
    Event,
}

impl PostKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostKind::Restaurant => "restaurant",
            PostKind::Activity => "activity",
            PostKind::Event => "event",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    Casual,
    Brunch,
    #[serde(rename = "Fine-dining")]
    FineDining,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FoodType {
    Asian,
    Italian,
    American,
    Mexican,
    Mediterranean,
    #[serde(rename = "Cafe's/Bakery")]
    Cafe,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DistanceFilter {
    #[serde(rename = "Close by")]
    CloseBy,
    #[default]
    #[serde(rename = "Moderate")]
    Moderate,
    #[serde(rename = "Further away")]
    FurtherAway,
}

impl DistanceFilter {
    pub fn radius_m(&self) -> f64 {
        match self {
            DistanceFilter::CloseBy => 300.0,
            DistanceFilter::Moderate => 5_000.0,
            DistanceFilter::FurtherAway => 20_000.0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DistanceFilter::CloseBy => "Close by",
            DistanceFilter::Moderate => "Moderate",
            DistanceFilter::FurtherAway => "Further away",
        }
    }

    pub fn next(&self) -> Self {
        match self {
            DistanceFilter::CloseBy => DistanceFilter::Moderate,
            DistanceFilter::Moderate => DistanceFilter::FurtherAway,
            DistanceFilter::FurtherAway => DistanceFilter::CloseBy,
        }
    }
}

/// Filter selection made by the user on the feed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FilterCriteria {
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default, rename = "foodTypes")]
    pub food_types: Vec<FoodType>,
    #[serde(default)]
    pub distance: DistanceFilter,
}

impl FilterCriteria {
    /// Label or food-type narrowing is in effect. Distance alone does not
    /// count: every query carries one.
    pub fn is_active(&self) -> bool {
        !self.labels.is_empty() || !self.food_types.is_empty()
    }

    /// A location matches when it carries every selected label and at least
    /// one selected food type. Empty selections match everything.
    pub fn matches(&self, labels: &[Label], food_types: &[FoodType]) -> bool {
        let labels_ok = self.labels.iter().all(|label| labels.contains(label));
        let food_ok = self.food_types.is_empty()
            || self
                .food_types
                .iter()
                .any(|food| food_types.contains(food));
        labels_ok && food_ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundMode {
    Filter,
    Page,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn distance_km(&self, other: &Coordinates) -> f64 {
        geo::distance_between(*self, *other)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl From<GeoPoint> for Coordinates {
    fn from(point: GeoPoint) -> Self {
        Coordinates::new(point.latitude, point.longitude)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MediaSrc {
    #[serde(default, rename = "thumbURL")]
    pub thumb_url: String,
    #[serde(default, rename = "videoURL")]
    pub video_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Metadata {
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default, rename = "foodTypes")]
    pub food_types: Vec<FoodType>,
    #[serde(default)]
    pub menu: String,
    #[serde(default)]
    pub reservation: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default, rename = "priceLevel")]
    pub price_level: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Post {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(default, rename = "userID")]
    pub user_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default, rename = "userDisplayName")]
    pub user_display_name: String,
    #[serde(default, rename = "userProfileImage")]
    pub user_profile_image: String,
    #[serde(default, rename = "locationID")]
    pub location_id: String,
    #[serde(default, rename = "locationName")]
    pub location_name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub distance: Option<f64>,
    #[serde(default, rename = "type")]
    pub kind: PostKind,
    #[serde(default)]
    pub src: MediaSrc,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, rename = "isVerified")]
    pub is_verified: bool,
    #[serde(default, rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(default, rename = "modifiedAt")]
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub views: i64,
    #[serde(default, rename = "tiktokLink")]
    pub source_link: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Post {
    /// Only posts with a resolved video URL may enter the feed window.
    pub fn is_playable(&self) -> bool {
        !self.src.video_url.trim().is_empty()
    }

    /// Copies the location fields a card needs onto the post.
    pub fn attach_location(&mut self, location: &Location, origin: Option<Coordinates>) {
        self.location_id = location.id.clone();
        self.location_name = location.name.clone();
        self.address = location.address.clone();
        self.kind = location.kind;
        self.location = Some(GeoPoint {
            latitude: location.lat,
            longitude: location.lng,
        });
        self.metadata.labels = location.labels.clone();
        self.metadata.food_types = location.food_types.clone();
        self.metadata.menu = location.menu.clone();
        self.metadata.reservation = location.reservation.clone();
        self.metadata.website = location.website.clone();
        self.metadata.rating = location.rating;
        self.metadata.price_level = location.price_level;
        self.distance = origin.map(|origin| origin.distance_km(&location.coordinates()));
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Location {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "searchName")]
    pub search_name: String,
    #[serde(default, rename = "type")]
    pub kind: PostKind,
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lng: f64,
    #[serde(default)]
    pub geohash: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default, rename = "foodTypes")]
    pub food_types: Vec<FoodType>,
    #[serde(default, rename = "isVerified")]
    pub is_verified: bool,
    #[serde(default)]
    pub menu: String,
    #[serde(default)]
    pub reservation: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default, rename = "priceLevel")]
    pub price_level: Option<i64>,
    #[serde(default)]
    pub distance: Option<f64>,
    #[serde(default, rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(default, rename = "modifiedAt")]
    pub modified_at: DateTime<Utc>,
}

impl Location {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.lat, self.lng)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Tag {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub count: i64,
    #[serde(default, rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(default, rename = "modifiedAt")]
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Like {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "postID")]
    pub post_id: String,
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(default, rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl Like {
    pub fn document_id(post_id: &str, user_id: &str) -> String {
        format!("{post_id}_{user_id}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedPost {
    #[serde(default, rename = "ID")]
    pub id: String,
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(rename = "postID")]
    pub post_id: String,
    #[serde(default, rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

pub const GUEST_USER_ID: &str = "guest";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct User {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default, rename = "displayName")]
    pub display_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, rename = "profileImage")]
    pub profile_image: String,
    #[serde(default, rename = "isVerified")]
    pub is_verified: bool,
    #[serde(default, rename = "isAdmin")]
    pub is_admin: bool,
    #[serde(default, rename = "isGuest")]
    pub is_guest: bool,
    #[serde(default)]
    pub blacklist: Vec<String>,
    #[serde(default, rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(default, rename = "modifiedAt")]
    pub modified_at: DateTime<Utc>,
}

impl User {
    pub fn guest() -> Self {
        Self {
            id: GUEST_USER_ID.to_string(),
            username: "guest".to_string(),
            display_name: "Guest".to_string(),
            is_verified: true,
            is_guest: true,
            ..Self::default()
        }
    }

    pub fn is_guest(&self) -> bool {
        self.is_guest || self.id == GUEST_USER_ID
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UserExplore {
    #[serde(default, rename = "ID")]
    pub id: String,
    #[serde(default)]
    pub posts: Vec<String>,
    #[serde(default)]
    pub current_index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn post_decodes_backend_field_names() {
        let value = json!({
            "ID": "p1",
            "userID": "u1",
            "locationID": "l1",
            "src": { "thumbURL": "t.jpg", "videoURL": "" },
            "tags": ["a", "b"],
            "isVerified": true,
            "views": 12,
            "createdAt": "2024-05-01T10:00:00Z"
        });
        let post: Post = serde_json::from_value(value).unwrap();
        assert_eq!(post.id, "p1");
        assert_eq!(post.location_id, "l1");
        assert_eq!(post.tags, vec!["a", "b"]);
        assert!(post.is_verified);
        assert!(!post.is_playable());
    }

    #[test]
    fn unknown_enum_values_fall_back_to_other() {
        let metadata: Metadata =
            serde_json::from_value(json!({ "labels": ["Rooftop"], "foodTypes": ["Cafe's/Bakery", "Thai"] }))
                .unwrap();
        assert_eq!(metadata.labels, vec![Label::Other]);
        assert_eq!(metadata.food_types, vec![FoodType::Cafe, FoodType::Other]);
    }

    #[test]
    fn filter_matches_against_selected_criteria() {
        let criteria = FilterCriteria {
            labels: vec![Label::Brunch],
            food_types: vec![FoodType::Italian, FoodType::Mexican],
            distance: DistanceFilter::Moderate,
        };
        assert!(criteria.matches(&[Label::Brunch, Label::Casual], &[FoodType::Italian]));
        assert!(!criteria.matches(&[Label::Casual], &[FoodType::Italian]));
        assert!(!criteria.matches(&[Label::Brunch], &[FoodType::Asian]));
        assert!(FilterCriteria::default().matches(&[], &[]));
    }

    #[test]
    fn guest_is_detected_by_flag_or_id() {
        assert!(User::guest().is_guest());
        let user = User {
            id: "guest".into(),
            ..User::default()
        };
        assert!(user.is_guest());
    }
}
