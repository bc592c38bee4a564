use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// ULID and ID Types
// ============================================================================

/// Any concept id as supplied by a caller. It may name a live concept or an
/// alias left behind by a merge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConceptId(pub String);

/// A concept id that has been through alias resolution and is therefore
/// never an alias. Aliases always point at one of these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CanonicalConceptId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReviewItemId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MergeId(pub String);

impl fmt::Display for ConceptId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for CanonicalConceptId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ReviewItemId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MergeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConceptId {
    fn from(raw: &str) -> Self {
        ConceptId(raw.to_string())
    }
}

impl From<CanonicalConceptId> for ConceptId {
    fn from(id: CanonicalConceptId) -> Self {
        ConceptId(id.0)
    }
}

impl CanonicalConceptId {
    pub fn as_concept_id(&self) -> ConceptId {
        ConceptId(self.0.clone())
    }
}

// ============================================================================
// Closed Enumerations
// ============================================================================

/// Error returned when a stored or user-supplied label is not a member of a
/// closed enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub enumeration: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.enumeration, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConceptKind {
    #[serde(rename = "concept")]
    Concept,
    #[serde(rename = "skill")]
    Skill,
    #[serde(rename = "fact")]
    Fact,
    #[serde(rename = "procedure")]
    Procedure,
    #[serde(rename = "definition")]
    Definition,
}

impl ConceptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConceptKind::Concept => "concept",
            ConceptKind::Skill => "skill",
            ConceptKind::Fact => "fact",
            ConceptKind::Procedure => "procedure",
            ConceptKind::Definition => "definition",
        }
    }
}

impl FromStr for ConceptKind {
    type Err = UnknownVariant;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "concept" => Ok(ConceptKind::Concept),
            "skill" => Ok(ConceptKind::Skill),
            "fact" => Ok(ConceptKind::Fact),
            "procedure" => Ok(ConceptKind::Procedure),
            "definition" => Ok(ConceptKind::Definition),
            other => Err(UnknownVariant {
                enumeration: "concept kind",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeType {
    #[serde(rename = "PREREQUISITE_OF")]
    PrerequisiteOf, // Must be understood before that
    #[serde(rename = "PART_OF")]
    PartOf,         // Component of a larger concept
    #[serde(rename = "USED_IN")]
    UsedIn,         // Applied within that
    #[serde(rename = "EXAMPLE_OF")]
    ExampleOf,      // Concrete instance of that
    #[serde(rename = "CONTRASTS_WITH")]
    ContrastsWith,  // Commonly confused with that
    #[serde(rename = "RELATED_TO")]
    RelatedTo,      // Generic semantic link
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::PrerequisiteOf => "PREREQUISITE_OF",
            EdgeType::PartOf => "PART_OF",
            EdgeType::UsedIn => "USED_IN",
            EdgeType::ExampleOf => "EXAMPLE_OF",
            EdgeType::ContrastsWith => "CONTRASTS_WITH",
            EdgeType::RelatedTo => "RELATED_TO",
        }
    }
}

impl FromStr for EdgeType {
    type Err = UnknownVariant;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "PREREQUISITE_OF" => Ok(EdgeType::PrerequisiteOf),
            "PART_OF" => Ok(EdgeType::PartOf),
            "USED_IN" => Ok(EdgeType::UsedIn),
            "EXAMPLE_OF" => Ok(EdgeType::ExampleOf),
            "CONTRASTS_WITH" => Ok(EdgeType::ContrastsWith),
            "RELATED_TO" => Ok(EdgeType::RelatedTo),
            other => Err(UnknownVariant {
                enumeration: "edge type",
                value: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// Graph Entities
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub id: ConceptId,
    pub title: String,
    pub kind: ConceptKind,
    pub l0_summary: Option<String>, // One line
    pub l1_summary: Option<String>, // Paragraph
    pub l2_summary: Option<String>, // Full explanation
    pub module: Option<String>,
    pub note_source: Option<String>,
    pub context: Option<String>,
    pub mastery_score: f64,
    pub created_at: String, // RFC3339
    pub updated_at: String, // RFC3339
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub from_concept_id: ConceptId,
    pub to_concept_id: ConceptId,
    pub edge_type: EdgeType,
    pub source_url: Option<String>,
    pub confidence: Option<f64>,
    pub verifier_score: Option<f64>,
    pub created_at: String, // RFC3339
    /// Always sorted by chunk id.
    pub evidence_chunk_ids: Vec<ChunkId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub id: ReviewItemId,
    pub concept_id: Option<ConceptId>,
    pub prompt: String,
    pub answer: String,
    pub due_at: Option<String>, // RFC3339
    pub created_at: String,     // RFC3339
}

/// Row of the concept <-> source join table. A (concept, source) pair is
/// stored at most once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConceptSource {
    pub concept_id: ConceptId,
    pub source_id: SourceId,
    pub created_at: String, // RFC3339
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptAlias {
    pub alias_id: ConceptId,
    pub canonical_id: CanonicalConceptId,
    pub merge_id: MergeId,
    pub created_at: String, // RFC3339
}

// ============================================================================
// Merge Records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptMerge {
    pub id: MergeId,
    pub canonical_id: ConceptId,
    pub duplicate_ids: Vec<ConceptId>,
    pub details: MergeDetails,
    pub created_at: String,         // RFC3339
    pub undone_at: Option<String>,  // RFC3339, set once by undo
}

impl ConceptMerge {
    pub fn is_undone(&self) -> bool {
        self.undone_at.is_some()
    }
}

/// Endpoints of an edge before and after a merge rewired it in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRewire {
    pub edge_id: EdgeId,
    pub from_before: ConceptId,
    pub to_before: ConceptId,
    pub from_after: ConceptId,
    pub to_after: ConceptId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewReassignment {
    pub review_item_id: ReviewItemId,
    pub previous_concept_id: ConceptId,
}

/// Reversal snapshot captured while a merge is applied. Holds every row the
/// merge destroyed or altered, so undo can run from this value alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeDetails {
    pub format: String,
    pub version: u32,
    pub duplicate_concepts: Vec<Concept>,
    pub rewired_edges: Vec<EdgeRewire>,
    pub deleted_edges: Vec<Edge>,
    pub review_items: Vec<ReviewReassignment>,
    /// Duplicate-owned links deleted by the merge.
    pub removed_source_links: Vec<ConceptSource>,
    /// Links created under the canonical concept that did not exist before.
    pub added_source_links: Vec<ConceptSource>,
    pub alias_ids: Vec<ConceptId>,
}

impl MergeDetails {
    pub const FORMAT: &'static str = "concept-merge-details";
    pub const VERSION: u32 = 1;

    pub fn empty() -> Self {
        Self {
            format: Self::FORMAT.to_string(),
            version: Self::VERSION,
            duplicate_concepts: Vec::new(),
            rewired_edges: Vec::new(),
            deleted_edges: Vec::new(),
            review_items: Vec::new(),
            removed_source_links: Vec::new(),
            added_source_links: Vec::new(),
            alias_ids: Vec::new(),
        }
    }

    /// Whether this snapshot was written by a format this build understands.
    pub fn is_current_format(&self) -> bool {
        self.format == Self::FORMAT && self.version == Self::VERSION
    }

    pub fn counts(&self) -> MergeCounts {
        MergeCounts {
            edges_rewired: self.rewired_edges.len(),
            edges_deleted: self.deleted_edges.len(),
            review_items: self.review_items.len(),
            source_links: self.removed_source_links.len(),
        }
    }
}

// ============================================================================
// Merge Preview
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeCounts {
    pub edges_rewired: usize,
    pub edges_deleted: usize,
    pub review_items: usize,
    pub source_links: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeAction {
    #[serde(rename = "rewire")]
    Rewire,
    #[serde(rename = "delete")]
    Delete, // Endpoints collapse into a self-loop
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeChange {
    pub edge_id: EdgeId,
    pub edge_type: EdgeType,
    pub action: EdgeAction,
    pub from_before: ConceptId,
    pub to_before: ConceptId,
    pub from_after: ConceptId,
    pub to_after: ConceptId,
    pub evidence_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptSummary {
    pub id: ConceptId,
    pub title: String,
    pub kind: ConceptKind,
    pub module: Option<String>,
}

impl From<&Concept> for ConceptSummary {
    fn from(concept: &Concept) -> Self {
        Self {
            id: concept.id.clone(),
            title: concept.title.clone(),
            kind: concept.kind,
            module: concept.module.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePreview {
    pub canonical: ConceptSummary,
    pub duplicates: Vec<ConceptSummary>,
    pub edge_changes: Vec<EdgeChange>,
    pub counts: MergeCounts,
    /// True when `edge_changes` was cut short by an edge limit. Counts are
    /// never truncated.
    pub edges_truncated: bool,
}

// ============================================================================
// Helper Functions
// ============================================================================

pub fn generate_concept_id() -> ConceptId {
    ConceptId(format!("concept_{}", ulid::Ulid::new()))
}

pub fn generate_edge_id() -> EdgeId {
    EdgeId(format!("edge_{}", ulid::Ulid::new()))
}

pub fn generate_review_item_id() -> ReviewItemId {
    ReviewItemId(format!("review_{}", ulid::Ulid::new()))
}

pub fn generate_merge_id() -> MergeId {
    MergeId(format!("merge_{}", ulid::Ulid::new()))
}
