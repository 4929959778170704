//! Pages the agent may control.

use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Registry of open pages and the cache generation controlling each.
///
/// A page opened before the agent activated stays under its old controller
/// (or none) until the agent claims it.
#[derive(Debug, Default)]
pub struct Clients {
  pages: RwLock<BTreeMap<String, Option<String>>>,
}

impl Clients {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a page opened before this agent activated.
  #[cfg(test)]
  pub fn open(&self, id: &str, controller: Option<&str>) -> Result<()> {
    self
      .pages
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?
      .insert(id.to_string(), controller.map(String::from));
    Ok(())
  }

  /// Generation controlling the page, if any.
  #[cfg(test)]
  pub fn controller(&self, id: &str) -> Result<Option<String>> {
    Ok(
      self
        .pages
        .read()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?
        .get(id)
        .cloned()
        .flatten(),
    )
  }

  /// Generation controlling the page.
  ///
  /// A page not seen before was opened while `cache_name` is active, so it
  /// is registered as controlled by it.
  pub fn controller_or_adopt(&self, id: &str, cache_name: &str) -> Result<Option<String>> {
    let mut pages = self
      .pages
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(
      pages
        .entry(id.to_string())
        .or_insert_with(|| Some(cache_name.to_string()))
        .clone(),
    )
  }

  /// Take control of every open page. Returns how many changed controller.
  pub fn claim(&self, cache_name: &str) -> Result<usize> {
    let mut pages = self
      .pages
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut claimed = 0;
    for controller in pages.values_mut() {
      if controller.as_deref() != Some(cache_name) {
        *controller = Some(cache_name.to_string());
        claimed += 1;
      }
    }

    Ok(claimed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_claim_takes_over_open_pages() {
    let clients = Clients::new();
    clients.open("tab-1", Some("mortzkey-v1.0.0")).unwrap();
    clients.open("tab-2", None).unwrap();
    clients.open("tab-3", Some("mortzkey-v2.0.0")).unwrap();

    assert_eq!(clients.claim("mortzkey-v2.0.0").unwrap(), 2);
    for id in ["tab-1", "tab-2", "tab-3"] {
      assert_eq!(
        clients.controller(id).unwrap().as_deref(),
        Some("mortzkey-v2.0.0")
      );
    }
    assert_eq!(clients.claim("mortzkey-v2.0.0").unwrap(), 0);
  }

  #[test]
  fn test_unknown_pages_are_adopted() {
    let clients = Clients::new();
    clients.open("tab-old", Some("mortzkey-v1.0.0")).unwrap();

    assert_eq!(
      clients
        .controller_or_adopt("tab-new", "mortzkey-v2.0.0")
        .unwrap()
        .as_deref(),
      Some("mortzkey-v2.0.0")
    );
    assert_eq!(
      clients
        .controller_or_adopt("tab-old", "mortzkey-v2.0.0")
        .unwrap()
        .as_deref(),
      Some("mortzkey-v1.0.0")
    );
    assert_eq!(
      clients.controller("tab-new").unwrap().as_deref(),
      Some("mortzkey-v2.0.0")
    );
  }
}
