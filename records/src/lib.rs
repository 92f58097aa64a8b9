//! Persisted records of the exam system and the store they live in.
//!
//! Entities are plain data with identity. Template objects are append-only:
//! editing one creates a new version linked through `previous_version` /
//! `superseded_by` and retires the old row.
pub mod db;
pub mod identity;
pub mod localized;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub use db::{Entity, MemoryStore, Store, StoreError};
pub use identity::Identity;
pub use localized::{FALLBACK_LOCALE, LOCALES, LocalizedText, LocalizedTextError};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Student,
    Teacher,
    Admin,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub external_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub retired_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn from_identity(identity: &Identity) -> Self {
        let mut user = Self {
            id: Uuid::new_v4(),
            external_id: identity.user_id.clone(),
            first_name: String::new(),
            last_name: String::new(),
            email: None,
            role: Role::default(),
            created_at: Utc::now(),
            retired_at: None,
        };
        user.update_from_identity(identity);
        user
    }

    /// Refreshes the profile after a login. A role suggestion only ever raises the role.
    pub fn update_from_identity(&mut self, identity: &Identity) {
        self.first_name = identity.first_name.clone();
        self.last_name = identity.last_name.clone();
        self.email = identity.primary_email().map(str::to_string);
        if let Some(role) = identity.suggested_role {
            if role_rank(role) > role_rank(self.role) {
                self.role = role;
            }
        }
    }
}

fn role_rank(role: Role) -> u8 {
    match role {
        Role::Student => 0,
        Role::Teacher => 1,
        Role::Admin => 2,
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateTest {
    pub id: Uuid,
    pub caption: LocalizedText,
    pub external_id: Option<String>,
    pub course_id: Option<String>,
    /// Serialized grading scale, `{ "<mark>": <min points> }`.
    pub grading: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub retired_at: Option<DateTime<Utc>>,
}

impl TemplateTest {
    pub fn new(caption: LocalizedText, external_id: Option<String>, course_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            caption,
            external_id,
            course_id,
            grading: None,
            created_at: Utc::now(),
            retired_at: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateQuestionsGroup {
    pub id: Uuid,
    pub test_id: Uuid,
    pub ordering: u32,
    pub select_count: u32,
    pub points: i64,
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub previous_version: Option<Uuid>,
    pub superseded_by: Option<Uuid>,
    pub retired_at: Option<DateTime<Utc>>,
}

impl TemplateQuestionsGroup {
    pub fn new(test_id: Uuid, ordering: u32, select_count: u32, points: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            test_id,
            ordering,
            select_count,
            points,
            external_id: None,
            created_at: Utc::now(),
            previous_version: None,
            superseded_by: None,
            retired_at: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.retired_at.is_none()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateQuestion {
    pub id: Uuid,
    pub test_id: Uuid,
    pub group_id: Uuid,
    /// `None` marks a dynamically generated question.
    pub question_type: Option<String>,
    pub data: Value,
    pub caption: LocalizedText,
    pub external_id: Option<String>,
    pub disabled: bool,
    pub created_at: DateTime<Utc>,
    pub previous_version: Option<Uuid>,
    pub superseded_by: Option<Uuid>,
    pub retired_at: Option<DateTime<Utc>>,
}

impl TemplateQuestion {
    pub fn new(
        test_id: Uuid,
        group_id: Uuid,
        question_type: Option<String>,
        data: Value,
        caption: LocalizedText,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            test_id,
            group_id,
            question_type: question_type.filter(|t| !t.is_empty()),
            data,
            caption,
            external_id: None,
            disabled: false,
            created_at: Utc::now(),
            previous_version: None,
            superseded_by: None,
            retired_at: None,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        self.question_type.is_none()
    }

    /// Live and enabled, so it can be drawn into new exams.
    pub fn is_selectable(&self) -> bool {
        self.retired_at.is_none() && !self.disabled
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TermState {
    Scheduled,
    Started,
    Finished,
    Archived,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestTerm {
    pub id: Uuid,
    pub template_id: Uuid,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub external_id: Option<String>,
    pub note: Option<String>,
    pub grading: Option<Value>,
}

impl TestTerm {
    /// New term for the template, inheriting its grading scale.
    pub fn new(template: &TemplateTest, scheduled_at: Option<DateTime<Utc>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            template_id: template.id,
            scheduled_at,
            started_at: None,
            finished_at: None,
            archived_at: None,
            location: None,
            external_id: None,
            note: None,
            grading: template.grading.clone(),
        }
    }

    pub fn state(&self) -> TermState {
        if self.archived_at.is_some() {
            TermState::Archived
        } else if self.finished_at.is_some() {
            TermState::Finished
        } else if self.started_at.is_some() {
            TermState::Started
        } else {
            TermState::Scheduled
        }
    }

    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentRegistration {
    pub id: Uuid,
    pub term_id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl EnrollmentRegistration {
    pub fn new(term_id: Uuid, user_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            term_id,
            user_id,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnrolledUser {
    pub id: Uuid,
    pub term_id: Uuid,
    pub user_id: Uuid,
    /// Drawn once at enrollment and never changed.
    pub seed: u32,
    pub score: Option<i64>,
    pub max_score: Option<i64>,
    pub locked: bool,
    pub created_at: DateTime<Utc>,
}

impl EnrolledUser {
    pub fn new(term_id: Uuid, user_id: Uuid, seed: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            term_id,
            user_id,
            seed,
            score: None,
            max_score: None,
            locked: false,
            created_at: Utc::now(),
        }
    }
}

/// One generated question of one enrollment.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: Uuid,
    pub enrolled_user_id: Uuid,
    pub term_id: Uuid,
    pub template_group_id: Uuid,
    pub template_question_id: Uuid,
    pub ordering: u32,
    pub points: i64,
    pub question_type: String,
    pub caption: LocalizedText,
    pub data: Value,
    pub last_answer_id: Option<Uuid>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub id: Uuid,
    pub question_id: Uuid,
    pub answer: Value,
    pub created_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub points: Option<i64>,
    pub auto_points: Option<i64>,
    pub correctness: Option<f64>,
    pub evaluated_at: Option<DateTime<Utc>>,
    pub auto_evaluated_at: Option<DateTime<Utc>>,
    pub public_comment: Option<String>,
    pub private_comment: Option<String>,
}

impl Answer {
    pub fn new(question_id: Uuid, answer: Value, ip_address: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            question_id,
            answer,
            created_at: Utc::now(),
            ip_address,
            points: None,
            auto_points: None,
            correctness: None,
            evaluated_at: None,
            auto_evaluated_at: None,
            public_comment: None,
            private_comment: None,
        }
    }
}

macro_rules! entity {
    ($ty:ty, $collection:literal) => {
        impl Entity for $ty {
            const COLLECTION: &'static str = $collection;

            fn id(&self) -> Uuid {
                self.id
            }
        }
    };
    ($ty:ty, $collection:literal, |$this:ident| $key:expr) => {
        impl Entity for $ty {
            const COLLECTION: &'static str = $collection;

            fn id(&self) -> Uuid {
                self.id
            }

            fn unique_key(&self) -> Option<String> {
                let $this = self;
                Some($key)
            }
        }
    };
}

entity!(User, "User", |u| u.external_id.clone());
entity!(TemplateTest, "TemplateTest");
entity!(TemplateQuestionsGroup, "TemplateQuestionsGroup");
entity!(TemplateQuestion, "TemplateQuestion");
entity!(TestTerm, "TestTerm");
entity!(EnrollmentRegistration, "EnrollmentRegistration", |r| format!(
    "{}:{}",
    r.term_id, r.user_id
));
entity!(EnrolledUser, "EnrolledUser", |e| format!(
    "{}:{}",
    e.term_id, e.user_id
));
entity!(Question, "Question");
entity!(Answer, "Answer");
