mod aliases;
mod lifecycle;
