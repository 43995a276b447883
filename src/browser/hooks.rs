//! In-page capture hooks
//!
//! A script injected into every document of the recorded tab. It posts
//! `PageSignal` JSON through a CDP binding for navigations, clicks and input,
//! attaching a serialized snapshot of the document and the element-index path
//! of the event target.

use crate::error::Result;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::cdp::js_protocol::runtime::{AddBindingParams, EventBindingCalled};
use chromiumoxide::listeners::EventStream;
use chromiumoxide::page::Page;

/// Binding the hook script posts signals through
pub const BINDING_NAME: &str = "__clickpathSignal";

/// `serialize(root)` and `pathOf(el)` shared by the hook and snapshot scripts.
///
/// The document is emitted as a flat pre-order list where every node names
/// its parent by index, so arbitrarily deep pages serialize without recursion.
const SERIALIZER_JS: &str = r#"
  const serialize = (root) => {
    const nodes = [];
    const stack = [[root, null]];
    while (stack.length) {
      const [node, parent] = stack.pop();
      const index = nodes.length;
      if (node.nodeType === Node.TEXT_NODE) {
        nodes.push({ parent, text: node.nodeValue || '' });
        continue;
      }
      const attrs = {};
      for (const a of node.attributes || []) {
        attrs[a.name] = a.value;
      }
      nodes.push({ parent, tag: node.tagName.toLowerCase(), attrs });
      const children = node.childNodes;
      for (let i = children.length - 1; i >= 0; i--) {
        const child = children[i];
        if (child.nodeType === Node.ELEMENT_NODE || child.nodeType === Node.TEXT_NODE) {
          stack.push([child, index]);
        }
      }
    }
    return nodes;
  };
  const pathOf = (el) => {
    const path = [];
    while (el && el !== document.documentElement) {
      const parent = el.parentElement;
      if (!parent) break;
      path.unshift(Array.prototype.indexOf.call(parent.children, el));
      el = parent;
    }
    return path;
  };
"#;

const HOOK_TEMPLATE: &str = r#"
(() => {
  if (window.__clickpathHooked) return;
  window.__clickpathHooked = true;
  /*SERIALIZER*/
  let domDirty = true;
  let lastUrl = location.href;

  const post = (signal) => {
    try {
      window['__BINDING__'](JSON.stringify(signal));
    } catch (e) {
      // Binding gone: the recorder detached from this tab
      domDirty = true;
    }
  };
  const snapshot = () => {
    domDirty = false;
    return serialize(document.documentElement);
  };
  const page = () => ({ url: location.href, title: document.title });
  const nav = (type) => post(Object.assign({ type }, page()));
  const navIfMoved = (type) => {
    if (location.href === lastUrl) return;
    lastUrl = location.href;
    nav(type);
  };

  window.addEventListener('load', () => {
    lastUrl = location.href;
    nav('load');
  });
  window.addEventListener('popstate', () => navIfMoved('pop_state'));
  window.addEventListener('hashchange', () => navIfMoved('hash_change'));
  for (const method of ['pushState', 'replaceState']) {
    const original = history[method];
    history[method] = function () {
      const result = original.apply(this, arguments);
      navIfMoved('url_changed');
      return result;
    };
  }
  new MutationObserver(() => {
    domDirty = true;
    navIfMoved('url_changed');
  }).observe(document, { subtree: true, childList: true, attributes: true, characterData: true });

  document.addEventListener('click', (e) => {
    const target = e.target && e.target.nodeType === Node.ELEMENT_NODE
      ? e.target : e.target && e.target.parentElement;
    if (!target) return;
    post(Object.assign({
      type: 'click',
      timestamp: Date.now(),
      x: e.clientX,
      y: e.clientY,
      button: e.button,
      modifiers: { ctrl: e.ctrlKey, shift: e.shiftKey, alt: e.altKey, meta: e.metaKey },
      target_path: pathOf(target),
      document: snapshot(),
    }, page()));
  }, true);

  // Keystrokes only carry a document after the page changed; the recorder
  // reuses the last one it received otherwise.
  const onInput = (e) => {
    const el = e.target;
    if (!el || !['INPUT', 'TEXTAREA', 'SELECT'].includes(el.tagName)) return;
    const signal = {
      type: 'input',
      timestamp: Date.now(),
      value: String(el.value || ''),
      target_path: pathOf(el),
    };
    if (domDirty) signal.document = snapshot();
    post(Object.assign(signal, page()));
  };
  document.addEventListener('input', onInput, true);
  document.addEventListener('change', onInput, true);
})();
"#;

/// The hook script with the binding name filled in
pub fn hook_script() -> String {
    HOOK_TEMPLATE
        .replace("/*SERIALIZER*/", SERIALIZER_JS)
        .replace("__BINDING__", BINDING_NAME)
}

/// Expression evaluating to the serialized live document
pub fn snapshot_expression() -> String {
    format!(
        "(() => {{ {} return serialize(document.documentElement); }})()",
        SERIALIZER_JS
    )
}

/// Register the binding and inject the hook into the current and every
/// future document of `page`. Returns the stream of binding calls.
pub async fn install_hooks(page: &Page) -> Result<EventStream<EventBindingCalled>> {
    page.execute(AddBindingParams::new(BINDING_NAME)).await?;
    let events = page.event_listener::<EventBindingCalled>().await?;

    let script = hook_script();
    page.execute(AddScriptToEvaluateOnNewDocumentParams::new(script.clone()))
        .await?;
    page.evaluate(script).await?;

    log::info!("Capture hooks installed (binding {})", BINDING_NAME);
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_script_is_filled_in() {
        let script = hook_script();
        assert!(script.contains("window['__clickpathSignal']"));
        assert!(script.contains("const serialize"));
        assert!(!script.contains("/*SERIALIZER*/"));
    }

    #[test]
    fn test_hook_guards_repeated_urls() {
        let script = hook_script();
        assert!(script.contains("if (location.href === lastUrl) return;"));
        assert!(script.contains("new MutationObserver"));
        assert!(script.contains("if (domDirty) signal.document = snapshot();"));
    }
}
