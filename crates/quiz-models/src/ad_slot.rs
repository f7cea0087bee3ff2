use crate::Id;

/// An optional ad break configured for a specific question position within
/// a quiz (§4.4 step 8). Absence of a row for a position means no ad break
/// runs there; scheduling which positions carry one is an external
/// collaborator's concern (ad-asset upload and placement are out of scope).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AdSlot {
    pub quiz_id: Id,
    pub position: i32,
    pub media_type: String,
    pub media_url: String,
    pub duration_sec: u32,
}
