//! Control messages carried as SYSTEM fields.
//!
//! A quit message is a system container holding the `decaf_quit` field; it
//! reaches every destination regardless of the redistribution strategy.

use crate::data::container::Container;
use crate::data::field::Field;
use crate::data::policy::{Flags, MergePolicy, Scope, SplitPolicy};
use crate::redist_error::RedistError;

pub const QUIT_FIELD: &str = "decaf_quit";
pub const ITERATION_FIELD: &str = "decaf_iteration";

fn set_system_int(c: &mut Container, name: &str, value: i32) -> Result<(), RedistError> {
    if c.has_data(name) {
        return c.update_data(name, Field::simple(value));
    }
    c.append_data(
        name,
        Field::simple(value),
        Flags::NOFLAG,
        Scope::System,
        SplitPolicy::KeepValue,
        MergePolicy::FirstValue,
    )
}

/// Turn `c` into a quit message.
pub fn set_quit(c: &mut Container) -> Result<(), RedistError> {
    set_system_int(c, QUIT_FIELD, 1)?;
    c.set_system(true);
    Ok(())
}

pub fn is_quit(c: &Container) -> bool {
    c.has_data(QUIT_FIELD)
}

pub fn set_iteration(c: &mut Container, iteration: i32) -> Result<(), RedistError> {
    set_system_int(c, ITERATION_FIELD, iteration)
}

pub fn iteration(c: &Container) -> Option<i32> {
    c.get_simple::<i32>(ITERATION_FIELD)
}
