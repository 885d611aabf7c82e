/*!
Command handlers for the CLI

This module provides command handlers invoked by the CLI entrypoint:

- `session`  -- sign-in, renew, sign-out and whoami against one session
- `discover` -- fetch and display the authority's discovery document

Handlers build their collaborators from [`Config`](crate::config::Config)
and print results; the lifecycle logic lives in [`crate::auth`].
*/

pub mod discover;
pub mod session;
