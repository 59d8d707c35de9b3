pub mod audit;
pub mod item;
pub mod request;
pub mod user;

pub use audit::{AuditLogModel, HistoryModel};
pub use item::{clean_ident, synthetic_serial, ItemDraft, ItemEdit, ItemModel};
pub use request::{
    compute_move, InstallationData, InstallationItem, MoveAction, MoveRequestData, MoveUpdate,
    PendingRequestModel, RequestPayload, RequestType,
};
pub use user::UserModel;
