//! Ops bridging the sandbox shims in `bootstrap.js` to the engine's headless
//! DOM and console sink.
//!
//! The engine installs [`DomHandle`] and [`SinkHandle`] into the runtime's
//! `OpState` right after construction; every op resolves its target through
//! them. Node ids crossing the boundary are plain `u32` handles into the DOM
//! arena; listener ids tie a Rust-side registration to the JS-side callback
//! registry.

use crate::dom::Document;
use crate::result::{ConsoleSink, LogLevel};
use anyhow::{anyhow, Error};
use deno_core::{op2, OpState};
use std::cell::RefCell;
use std::rc::Rc;

/// Shared handle to the engine's document, stored in `OpState`.
pub(crate) struct DomHandle(pub(crate) Rc<RefCell<Document>>);

/// Shared handle to the engine's console sink, stored in `OpState`.
pub(crate) struct SinkHandle(pub(crate) Rc<RefCell<ConsoleSink>>);

fn dom(state: &OpState) -> Result<Rc<RefCell<Document>>, Error> {
    state
        .try_borrow::<DomHandle>()
        .map(|handle| handle.0.clone())
        .ok_or_else(|| anyhow!("engine document not initialized"))
}

// ============================================================================
// Console
// ============================================================================

#[op2(fast)]
fn op_console_write(
    state: &mut OpState,
    #[string] level: &str,
    #[string] message: &str,
    #[string] args_json: &str,
) {
    if let Some(handle) = state.try_borrow::<SinkHandle>() {
        let args = serde_json::from_str(args_json).unwrap_or_default();
        handle
            .0
            .borrow_mut()
            .push(LogLevel::parse(level), message.to_string(), args);
    }
}

// ============================================================================
// DOM
// ============================================================================

#[op2(fast)]
fn op_dom_container(state: &mut OpState) -> Result<u32, Error> {
    Ok(dom(state)?.borrow().container())
}

#[op2(fast)]
fn op_dom_head(state: &mut OpState) -> Result<u32, Error> {
    Ok(dom(state)?.borrow().head())
}

#[op2]
fn op_dom_query(
    state: &mut OpState,
    scope: u32,
    #[string] selector: &str,
) -> Result<Option<u32>, Error> {
    dom(state)?.borrow().query_selector(scope, selector)
}

#[op2]
#[serde]
fn op_dom_query_all(
    state: &mut OpState,
    scope: u32,
    #[string] selector: &str,
) -> Result<Vec<u32>, Error> {
    dom(state)?.borrow().query_selector_all(scope, selector)
}

#[op2(fast)]
fn op_dom_create_element(state: &mut OpState, #[string] tag: &str) -> Result<u32, Error> {
    Ok(dom(state)?.borrow_mut().create_element(tag))
}

#[op2(fast)]
fn op_dom_create_text(state: &mut OpState, #[string] text: &str) -> Result<u32, Error> {
    Ok(dom(state)?.borrow_mut().create_text(text))
}

#[op2(fast)]
fn op_dom_create_fragment(state: &mut OpState) -> Result<u32, Error> {
    Ok(dom(state)?.borrow_mut().create_fragment())
}

#[op2(fast)]
fn op_dom_append_child(state: &mut OpState, parent: u32, child: u32) -> Result<(), Error> {
    dom(state)?.borrow_mut().append_child(parent, child)
}

#[op2(fast)]
fn op_dom_remove_child(state: &mut OpState, parent: u32, child: u32) -> Result<(), Error> {
    dom(state)?.borrow_mut().remove_child(parent, child)
}

#[op2]
#[string]
fn op_dom_tag_name(state: &mut OpState, node: u32) -> Result<String, Error> {
    dom(state)?.borrow().tag_name(node)
}

#[op2]
#[string]
fn op_dom_get_text(state: &mut OpState, node: u32) -> Result<String, Error> {
    dom(state)?.borrow().text_content(node)
}

#[op2(fast)]
fn op_dom_set_text(state: &mut OpState, node: u32, #[string] text: &str) -> Result<(), Error> {
    dom(state)?.borrow_mut().set_text_content(node, text)
}

#[op2]
#[string]
fn op_dom_get_inner_html(state: &mut OpState, node: u32) -> Result<String, Error> {
    dom(state)?.borrow().inner_html(node)
}

#[op2(fast)]
fn op_dom_set_inner_html(
    state: &mut OpState,
    node: u32,
    #[string] html: &str,
) -> Result<(), Error> {
    dom(state)?.borrow_mut().set_inner_html(node, html)
}

#[op2]
#[string]
fn op_dom_get_attr(
    state: &mut OpState,
    node: u32,
    #[string] name: &str,
) -> Result<Option<String>, Error> {
    dom(state)?.borrow().get_attr(node, name)
}

#[op2(fast)]
fn op_dom_set_attr(
    state: &mut OpState,
    node: u32,
    #[string] name: &str,
    #[string] value: &str,
) -> Result<(), Error> {
    dom(state)?.borrow_mut().set_attr(node, name, value)
}

#[op2(fast)]
fn op_dom_remove_attr(state: &mut OpState, node: u32, #[string] name: &str) -> Result<(), Error> {
    dom(state)?.borrow_mut().remove_attr(node, name)
}

#[op2(fast)]
fn op_dom_add_listener(
    state: &mut OpState,
    node: u32,
    #[string] event: &str,
) -> Result<u32, Error> {
    dom(state)?.borrow_mut().add_listener(node, event)
}

#[op2(fast)]
fn op_dom_remove_listener(
    state: &mut OpState,
    node: u32,
    #[string] event: &str,
    listener: u32,
) -> Result<(), Error> {
    dom(state)?
        .borrow_mut()
        .remove_listener(node, event, listener)
}

deno_core::extension!(
    playground,
    ops = [
        op_console_write,
        op_dom_container,
        op_dom_head,
        op_dom_query,
        op_dom_query_all,
        op_dom_create_element,
        op_dom_create_text,
        op_dom_create_fragment,
        op_dom_append_child,
        op_dom_remove_child,
        op_dom_tag_name,
        op_dom_get_text,
        op_dom_set_text,
        op_dom_get_inner_html,
        op_dom_set_inner_html,
        op_dom_get_attr,
        op_dom_set_attr,
        op_dom_remove_attr,
        op_dom_add_listener,
        op_dom_remove_listener,
    ],
    esm_entry_point = "ext:playground/bootstrap.js",
    esm = ["ext:playground/bootstrap.js" = "src/bootstrap.js"],
);
