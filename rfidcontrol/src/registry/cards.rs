use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info};

use super::{CardRegistry, load_json_file, save_json_file};
use crate::errors::Result;
use crate::model::Card;

/// Cards stored as a JSON object keyed by card id.
#[derive(Debug)]
pub struct JsonCardRegistry {
    path: PathBuf,
    cards: Mutex<HashMap<String, Card>>,
}

impl JsonCardRegistry {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let cards: HashMap<String, Card> = load_json_file(&path)?;
        info!(file = %path.display(), count = cards.len(), "Card registry loaded");
        Ok(Self {
            path,
            cards: Mutex::new(cards),
        })
    }

    fn cards(&self) -> MutexGuard<'_, HashMap<String, Card>> {
        self.cards.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CardRegistry for JsonCardRegistry {
    fn get(&self, id: &str) -> Option<Card> {
        self.cards().get(id).cloned()
    }

    fn list(&self) -> HashMap<String, Card> {
        self.cards().clone()
    }

    fn add(&self, card: Card) -> Result<()> {
        let mut cards = self.cards();
        debug!(card_id = %card.id, name = %card.name, "Storing card");
        cards.insert(card.id.clone(), card);
        save_json_file(&self.path, &*cards)
    }

    fn remove(&self, id: &str) -> Result<bool> {
        let mut cards = self.cards();
        if cards.remove(id).is_none() {
            return Ok(false);
        }
        save_json_file(&self.path, &*cards)?;
        Ok(true)
    }
}
