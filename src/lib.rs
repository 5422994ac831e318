pub mod compute;
pub mod sim;

#[cfg(test)]
mod test;
