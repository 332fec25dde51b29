mod a64;
