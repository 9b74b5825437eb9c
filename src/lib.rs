// Motion-control core of a quadruped desktop pet
//
// servo     - four-joint servo driver over a pulse-output peripheral
// actions   - choreography of every named action
// scheduler - single worker thread serializing action requests
// tools     - status-text interface for the remote command layer

pub mod actions;
pub mod config;
pub mod messages;
pub mod runtime;
pub mod scheduler;
pub mod servo;
pub mod tools;
