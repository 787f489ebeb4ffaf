mod campaigns;
mod events;
