// Stand-in peer used when running without a real broker.
pub mod plant;
