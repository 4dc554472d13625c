use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    domain::{ChatId, Listing, OwnerId},
    formatting::format_listing_html,
    messaging::port::MessagingPort,
    ports::Delivery,
    Error, Result,
};

/// Delivers a matched listing as an HTML message to the owner's private chat.
pub struct MessengerDelivery {
    messenger: Arc<dyn MessagingPort>,
}

impl MessengerDelivery {
    pub fn new(messenger: Arc<dyn MessagingPort>) -> Self {
        Self { messenger }
    }
}

#[async_trait]
impl Delivery for MessengerDelivery {
    async fn deliver(&self, owner: OwnerId, listing: &Listing) -> Result<()> {
        let html = format_listing_html(listing);
        let max = self.messenger.capabilities().max_message_len;
        if html.chars().count() > max {
            return Err(Error::Delivery(format!(
                "message for {} exceeds {max} chars",
                listing.id
            )));
        }

        self.messenger.send_html(ChatId::from(owner), &html).await?;
        Ok(())
    }
}
