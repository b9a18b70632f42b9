//! lastmove-core: urgency math, notification policy and scheduling for LastMove

pub mod activity;
pub mod analyzer;
pub mod engagement;
pub mod evaluator;
pub mod gate;
pub mod notification;
pub mod period;
pub mod policy;
pub mod store;
pub mod time;
pub mod urgency;

pub use activity::{Activity, ActivitySnapshot, Frequency, FrequencyType, FrequencyUnit, Move};
pub use analyzer::{AnalysisSummary, BatchAnalyzer, DedupeMode};
pub use engagement::{current_streak, EngagementPasses, PassSummary};
pub use evaluator::{Evaluator, Verdict};
pub use gate::{run_check, run_manual, CheckReport, RegularSchedule};
pub use notification::{
    DeliveryStatus, NewNotification, NotificationKind, NotificationRecord, NotificationSettings,
    NotificationStats, Priority, PushSubscription, RecentNotification, SubscriptionKeys,
};
pub use period::period_hours;
pub use policy::{NotificationPolicy, Threshold};
pub use store::NotificationStore;
pub use urgency::urgency_percent;
