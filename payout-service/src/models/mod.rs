//! Data models for payout-service.

pub mod attachment;
pub mod candidate;
pub mod confirmation;
pub mod payment_request;
pub mod quotation;

pub use attachment::{AttachmentDescriptor, MAX_ATTACHMENT_BYTES, MAX_ATTACHMENT_COUNT};
pub use candidate::{merge_candidate_sources, project_group_display, CandidateItem, CandidateSource};
pub use confirmation::{
    ApprovedItemRow, ConfirmationDraft, PaymentConfirmation, PaymentConfirmationItem,
    RemittanceSettings, RemittanceSettingsMap,
};
pub use payment_request::{next_merge_color, PaymentRequest, VerificationStatus, MERGE_COLOR_PALETTE};
pub use quotation::BankInfo;
