//! Domain models for tasks, their history, and the stream wire frames.

pub mod history;
pub mod stream;
pub mod task;

pub use history::{NewTaskHistory, TaskHistory};
pub use stream::{stream_pair, AgentStream, ServerStream, StreamRequest, StreamResponse, WorkAssignment};
pub use task::{payload_from_json, payload_to_json, NewTask, StatusFilter, Task, TaskStatus};
