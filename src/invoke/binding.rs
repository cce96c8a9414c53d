//! Argument binding
//!
//! Declared parameters take positional arguments in order, falling back to
//! their default expressions evaluated in the now-active scope. Extra
//! arguments land in `$args`; explicitly bound parameters are recorded in
//! `$BoundParameters` in binding order.

use indexmap::IndexMap;

use crate::compiled::CompiledCode;
use crate::compiler::CompiledClauses;
use crate::invoke::{InvocationFrame, InvokeOptions};
use crate::services::ParameterMetadata;
use crate::slots::{AutomaticVariable, SlotsRef};
use crate::types::{Flow, Val};

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterBinding {
    pub name: String,
    pub value: Val,
    /// No argument was supplied; the value came from the default (or is null)
    pub was_defaulted: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindingReport {
    pub parameters: Vec<ParameterBinding>,
    /// Arguments beyond the declared parameters (`$args`)
    pub overflow: Vec<Val>,
}

impl BindingReport {
    pub fn get(&self, name: &str) -> Option<&ParameterBinding> {
        self.parameters
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Explicitly bound parameters in binding order
    pub fn bound_parameters(&self) -> IndexMap<String, Val> {
        self.parameters
            .iter()
            .filter(|p| !p.was_defaulted)
            .map(|p| (p.name.clone(), p.value.clone()))
            .collect()
    }
}

/// Set the caller-supplied automatic variables; absent values stay unset
pub(crate) fn seed_automatic(slots: &SlotsRef, options: &InvokeOptions, code: &CompiledCode) {
    let mut slots = slots.borrow_mut();
    if let Some(value) = &options.dollar_under {
        slots.set_automatic(AutomaticVariable::Underbar, value.clone());
    }
    if let Some(input) = &options.input {
        slots.set_automatic(AutomaticVariable::Input, Val::List(input.clone()));
    }
    if let Some(this) = &options.this {
        slots.set_automatic(AutomaticVariable::This, this.clone());
    }
    if let Some(file) = code.file() {
        slots.set_automatic(
            AutomaticVariable::CommandPath,
            Val::Str(file.display().to_string()),
        );
    }
}

pub(crate) fn bind_arguments(
    frame: &mut InvocationFrame<'_>,
    compiled: &CompiledClauses,
    params: &[ParameterMetadata],
    args: Vec<Val>,
) -> Flow<BindingReport> {
    let mut args = args.into_iter();
    let mut report = BindingReport::default();

    for (position, param) in params.iter().enumerate() {
        let (value, was_defaulted) = match args.next() {
            Some(value) => (value, false),
            None => match compiled.defaults.get(position).and_then(Option::as_ref) {
                Some(default) => (default(frame)?, true),
                None => (Val::Null, true),
            },
        };

        assign_parameter(frame, &param.name, value.clone());
        report.parameters.push(ParameterBinding {
            name: param.name.clone(),
            value,
            was_defaulted,
        });
    }

    report.overflow = args.collect();

    let mut slots = frame.slots.borrow_mut();
    slots.set_automatic(AutomaticVariable::Args, Val::List(report.overflow.clone()));
    slots.set_automatic(
        AutomaticVariable::BoundParameters,
        Val::Map(report.bound_parameters()),
    );
    drop(slots);

    Ok(report)
}

/// Slot fast path; by name in the active scope when the layout lacks the name
fn assign_parameter(frame: &mut InvocationFrame<'_>, name: &str, value: Val) {
    let index = frame.slots.borrow().layout().index_of(name);
    match index {
        Some(i) => {
            frame.slots.borrow_mut().set(i, value);
        }
        None => frame
            .ctx
            .session_state_mut()
            .current_mut()
            .set_local(name, value),
    }
}
