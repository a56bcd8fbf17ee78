// Services module - outbound collaborators used by workflow actions

pub mod chat;
pub mod email;
pub mod functions;
pub mod records;

pub use chat::{ChatError, ChatNotifier};
pub use email::{MailError, Mailer, SmtpMailer};
pub use functions::FunctionRegistry;
pub use records::{CaseSpec, NbaSpec, PgRecords, RecordError, RecordService, TaskSpec};

#[cfg(test)]
pub use email::RecordingMailer;
#[cfg(test)]
pub use records::MemoryRecords;
