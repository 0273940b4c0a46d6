pub mod entity;
pub mod id;

pub use entity::{Epic, MemberRole, Project, ProjectMember, Sprint, Task};
pub use id::{generate_id, EpicId, ProjectId, SessionId, SprintId, TaskId, UserId};
